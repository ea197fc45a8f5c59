//! The [`Executor`] trait: anything that can hand out a [`PgTransport`].
use std::future::Ready;

use crate::{transport::PgTransport, Result};

/// A type that can produce a [`PgTransport`] to run a query against.
pub trait Executor {
    type Transport: PgTransport;
    type Future: Future<Output = Result<Self::Transport>>;

    fn connection(self) -> Self::Future;
}

impl<T: PgTransport> Executor for &mut T {
    type Transport = Self;
    type Future = Ready<Result<Self>>;

    fn connection(self) -> Self::Future {
        std::future::ready(Ok(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TestConn;

    #[test]
    fn a_mutable_reference_hands_back_itself_as_the_transport() {
        let mut conn = TestConn::new(Vec::new());
        let transport = crate::block_on((&mut conn).connection()).unwrap();
        // `transport` is the same `&mut TestConn`; touching it compiles and
        // borrows `conn` for the duration, proving the blanket impl round-trips.
        let _: &mut TestConn = transport;
    }
}
