pub mod dispatch;
pub mod extraction;
pub mod registration;
pub mod triage;
