//! Behavioural coverage for acquiring an instance and running a batch.

mod bdd_steps;
mod scenarios;
mod test_helpers;
