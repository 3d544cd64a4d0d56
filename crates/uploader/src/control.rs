//! Collaborator traits for the control plane and the network.
//!
//! [`fieldlift_control_plane::Client`] implements all three; tests use mocks.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use fieldlift_control_plane::{Client, Error as ControlPlaneError, PutOutcome};
use fieldlift_protocol::{FinalizeRequest, PresignRequest, RecordNotifyRequest};

/// Boxed future returned by collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Control-plane calls. Each method is a single attempt.
pub trait ControlPlane: Send + Sync {
    fn presign<'a>(
        &'a self,
        req: &'a PresignRequest,
    ) -> BoxFuture<'a, Result<Vec<String>, ControlPlaneError>>;

    fn finalize<'a>(
        &'a self,
        req: &'a FinalizeRequest,
    ) -> BoxFuture<'a, Result<(), ControlPlaneError>>;

    fn notify_record<'a>(
        &'a self,
        req: &'a RecordNotifyRequest,
    ) -> BoxFuture<'a, Result<(), ControlPlaneError>>;
}

/// Raw part PUT used by the direct strategy.
pub trait PartTransport: Send + Sync {
    fn put_part<'a>(
        &'a self,
        url: &'a str,
        body: Bytes,
    ) -> BoxFuture<'a, Result<PutOutcome, ControlPlaneError>>;
}

/// Network reachability probe.
pub trait Reachability: Send + Sync {
    fn is_reachable(&self) -> BoxFuture<'_, bool>;
}

impl ControlPlane for Client {
    fn presign<'a>(
        &'a self,
        req: &'a PresignRequest,
    ) -> BoxFuture<'a, Result<Vec<String>, ControlPlaneError>> {
        Box::pin(Client::presign(self, req))
    }

    fn finalize<'a>(
        &'a self,
        req: &'a FinalizeRequest,
    ) -> BoxFuture<'a, Result<(), ControlPlaneError>> {
        Box::pin(Client::finalize(self, req))
    }

    fn notify_record<'a>(
        &'a self,
        req: &'a RecordNotifyRequest,
    ) -> BoxFuture<'a, Result<(), ControlPlaneError>> {
        Box::pin(Client::notify_record(self, req))
    }
}

impl PartTransport for Client {
    fn put_part<'a>(
        &'a self,
        url: &'a str,
        body: Bytes,
    ) -> BoxFuture<'a, Result<PutOutcome, ControlPlaneError>> {
        Box::pin(Client::put_part(self, url, body))
    }
}

impl Reachability for Client {
    fn is_reachable(&self) -> BoxFuture<'_, bool> {
        Box::pin(self.probe())
    }
}
