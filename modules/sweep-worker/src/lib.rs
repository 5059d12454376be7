pub mod actuator;
pub mod audit;
pub mod browserless;
pub mod classifier;
pub mod follow_list;
pub mod ledger;
pub mod locator;
pub mod remediator;
pub mod stats;
pub mod sweep;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod throttle;
