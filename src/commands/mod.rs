pub mod alerts;
pub mod neighbors;
pub mod run;
pub mod status;
pub mod train;
