pub mod dispatch_tests;
pub mod queue_tests;
pub mod recovery_tests;
