pub mod actor {
    #[allow(clippy::module_inception)]
    pub mod actor;
    pub mod spawn;

    pub use actor::{Actor, ActorContext, ActorRef};
    pub use spawn::spawn_actor;
}

pub mod context;
pub mod error;

pub mod execution {
    pub mod executor;
}

pub mod transformation;
pub mod unit;

#[cfg(test)]
mod tests {
    mod actor;
    mod transformation;
    mod unit;
}
