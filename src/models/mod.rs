// Data models for pose landmarks, the garment mesh and capture sessions

pub mod capture;
pub mod garment;
pub mod pose;
