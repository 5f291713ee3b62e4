pub mod config;

// Garment draping and capture
pub mod capture_orchestrator;
pub mod compositor;
pub mod drape_engine;
pub mod mirror_session;

// External collaborators
pub mod analysis_client;
pub mod cloth_preprocessor;
