pub mod check;
pub mod reconcile;
pub mod run;
pub mod tick;

// Re-export command functions for convenience
pub use check::check;
pub use reconcile::reconcile;
pub use run::run;
pub use tick::tick;
