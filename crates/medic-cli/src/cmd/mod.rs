pub mod audit;
pub mod config;
pub mod cycle;
pub mod partitions;
pub mod run;
