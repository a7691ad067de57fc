//! Credits Service - usage credits and plan quotas for a multi-tenant practice.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
