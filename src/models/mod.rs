pub mod catalog;
pub mod generation_job;
pub mod history;
pub mod marking;
pub mod question_block;
pub mod question_set;
