// Platform integrations: pose landmarker backends and garment rendering

pub mod pose;
pub mod render;
