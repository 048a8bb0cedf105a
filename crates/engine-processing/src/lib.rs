pub mod error;
pub mod error_router;
pub mod io;
pub mod registry;
pub mod step;
pub mod steps;
