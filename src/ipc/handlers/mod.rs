pub mod auth;
pub mod core;
pub mod grades;
pub mod professors;
pub mod students;
