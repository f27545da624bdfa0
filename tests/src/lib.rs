//! Workspace test suite.

pub mod harness;

#[cfg(test)]
mod backend;
#[cfg(test)]
mod exec;
#[cfg(test)]
mod integration;
