pub mod ai_service;
pub mod audio_service;
pub mod export_service;
pub mod history_service;
pub mod job_service;
pub mod marking_service;
pub mod question_generator;
pub mod scoring_service;
pub mod set_store;
