//! Background services

pub mod health_scheduler;

pub use health_scheduler::{
    HealthScheduler, HealthSchedulerConfig, HealthSchedulerHandle, RoundSummary,
};
