pub mod coalesce;
pub mod sim;
pub mod timeq;
pub mod ui;
