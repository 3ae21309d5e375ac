pub mod classrooms;
pub mod core;
pub mod grades;
pub mod reports;
pub mod settings;
pub mod students;
pub mod subjects;
pub mod terms;
