//! Kubernetes client for kubetap
//!
//! This crate provides Kubernetes API integration for selecting a context
//! and resolving workloads to the pods and containers whose logs are read.
//! The context is always an explicit parameter; nothing here keeps an
//! ambient "current cluster".

mod client;
mod workloads;

pub use client::{ContextInfo, KubeClient};
pub use workloads::{container_names, pods_for_workload, selector_string};

// Re-export types that are used in our public API
pub use kubetap_types::{LogTarget, WorkloadKind, WorkloadRef};
