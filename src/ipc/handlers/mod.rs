pub mod attendance;
pub mod backup;
pub mod core;
pub mod dashboard;
pub mod documents;
pub mod homevisits;
pub mod personnel;
pub mod reports;
pub mod students;
