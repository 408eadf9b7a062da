//! This module is used for collection of runtime metrics of a mobility node.
//! The main item of interest is the [`Metrics`] trait. Users can provide
//! their own implementation of this, or use the default provided
//! implementation to disable gathering metrics.

/// The collection of all metrics exported by a mobility node. It is up to
/// the user to provide an implementation which implements the methods for
/// metrics they are interested in. All methods have a default
/// implementation, so if the user is not interested in any metrics, a NOOP
/// handler can be implemented as follows:
///
/// ```rust
/// use pmip::metrics::Metrics;
///
/// #[derive(Clone)]
/// struct NoMetrics;
/// impl Metrics for NoMetrics {}
/// ```
pub trait Metrics {
    /// The mobility agent dropped an inbound datagram it could not parse as
    /// a mobility header message.
    #[inline]
    fn mh_malformed(&self) {}

    /// The node processed an inbound PBU. `accepted` records whether it was
    /// answered with a success status.
    #[inline]
    fn pbu_processed(&self, _accepted: bool) {}

    /// The node processed an inbound PBA matching an outstanding
    /// registration.
    #[inline]
    fn pba_processed(&self) {}

    /// A binding cache entry was created for a newly registered mobile node.
    #[inline]
    fn binding_created(&self) {}

    /// A binding was removed after a deregistration completed.
    #[inline]
    fn binding_removed(&self) {}

    /// A binding was removed because its lifetime expired without a refresh.
    #[inline]
    fn binding_expired(&self) {}

    /// A PBU was retransmitted because no acknowledgement arrived in time.
    #[inline]
    fn pbu_retransmitted(&self) {}

    /// A registration was abandoned: retransmissions were exhausted, the
    /// anchor rejected it, or the forwarding plane failed.
    #[inline]
    fn registration_failed(&self) {}
}

/// A [`Metrics`] implementation which doesn't keep any metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetrics;

impl Metrics for NoMetrics {}
