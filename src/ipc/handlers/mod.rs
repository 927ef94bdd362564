pub mod classes;
pub mod core;
pub mod eleves;
pub mod presences;
pub mod rr;
pub mod seances;
pub mod settings;
pub mod users;
