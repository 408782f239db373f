//! Dispatcher: one fetch order in, one worker invocation out
//!
//! Orders are never retried here. A failed invocation leaves no outcome in
//! the history, and the disabler reads that silence on its next sweep.

pub mod invoker;
pub mod regions;
pub mod routing;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::model::{CollectionType, FetchOrder};
use crate::observability::InvocationReport;
use crate::storage::keys::stills_prefix;

pub use invoker::{HttpInvoker, InvokeError, Invocation, MemoryInvoker, WorkerInvoker};
pub use regions::region_code;
pub use routing::{ProxyFlavour, RouteTable, WorkerFamily, WorkerRoute};

const COMPONENT: &str = "dispatcher";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("aimpoint {0} has no collRegions")]
    NoRegions(String),

    #[error("unknown region '{0}'")]
    UnknownRegion(String),

    #[error("invalid VPC proxy pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("payload encoding failed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error("dispatch exceeded its deadline")]
    Timeout,
}

impl DispatchError {
    /// The order itself is unusable; sending it again cannot succeed
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            DispatchError::NoRegions(_) | DispatchError::UnknownRegion(_) | DispatchError::Payload(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Where one order is going
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTarget {
    pub region: &'static str,
    pub worker: String,
}

/// Body sent to the worker: the order plus where its capture lands
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkerRequest<'a> {
    #[serde(flatten)]
    order: &'a FetchOrder,
    dst_bucket: &'a str,
    delivery: Delivery,
}

/// Delivery paths rendered at the order's due time
#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Delivery {
    prefix: String,
    file_name: String,
}

impl Delivery {
    fn for_order(order: &FetchOrder) -> Self {
        let aimpoint = &order.aimpoint;
        let due_ms = order.overrides.tick_ms + order.overrides.delay_secs as i64 * 1000;
        let at = DateTime::from_timestamp_millis(due_ms).unwrap_or_else(Utc::now);

        // Stills without an explicit template land under stills/<date>/<stem>/
        let prefix = if aimpoint.bucket_prefix_template.is_empty()
            && aimpoint.collection_type == CollectionType::Stills
        {
            stills_prefix(&aimpoint.file_stem(), at)
        } else {
            aimpoint.bucket_prefix(at)
        };
        Self {
            prefix,
            file_name: aimpoint.final_file_name(at),
        }
    }
}

pub struct Dispatcher {
    invoker: Arc<dyn WorkerInvoker>,
    routes: RouteTable,
    dst_bucket: String,
    deadline: Duration,
}

impl Dispatcher {
    pub fn new(invoker: Arc<dyn WorkerInvoker>, config: &Config) -> Result<Self> {
        Ok(Self {
            invoker,
            routes: RouteTable::new(
                &config.dispatch.vpc_proxy_pattern,
                config.dispatch.worker_prefix.clone(),
            )?,
            dst_bucket: config.storage.dst_bucket.clone(),
            deadline: config.deadlines.dispatch(),
        })
    }

    /// Pick the region (uniformly at random) and the worker name for `order`
    pub fn target<R: Rng + ?Sized>(&self, order: &FetchOrder, rng: &mut R) -> Result<DispatchTarget> {
        let aimpoint = &order.aimpoint;
        let name = aimpoint
            .coll_regions
            .choose(rng)
            .ok_or_else(|| DispatchError::NoRegions(aimpoint.device_id.clone()))?;
        let region = region_code(name).ok_or_else(|| DispatchError::UnknownRegion(name.clone()))?;

        Ok(DispatchTarget {
            region,
            worker: self.routes.worker_name(aimpoint),
        })
    }

    /// Invoke exactly one worker for `order`
    pub async fn dispatch(&self, order: &FetchOrder) -> Result<DispatchTarget> {
        let target = {
            let mut rng = rand::thread_rng();
            self.target(order, &mut rng)?
        };
        let payload = serde_json::to_vec(&WorkerRequest {
            order,
            dst_bucket: &self.dst_bucket,
            delivery: Delivery::for_order(order),
        })?;

        tokio::time::timeout(
            self.deadline,
            self.invoker
                .invoke(target.region, &target.worker, Bytes::from(payload)),
        )
        .await
        .map_err(|_| DispatchError::Timeout)??;

        info!(
            order_id = %order.order_id,
            device_id = %order.aimpoint.device_id,
            region = target.region,
            worker = %target.worker,
            delay_secs = order.overrides.delay_secs,
            "Order dispatched"
        );
        Ok(target)
    }

    /// Dispatch and turn the result into an audit record
    pub async fn run(&self, order: &FetchOrder) -> InvocationReport {
        match self.dispatch(order).await {
            Ok(target) => InvocationReport::ok(
                COMPONENT,
                format!("{} invoked in {}", target.worker, target.region),
            )
            .with_count("invoked", 1),
            Err(e) => {
                warn!(
                    order_id = %order.order_id,
                    device_id = %order.aimpoint.device_id,
                    error = %e,
                    "Dispatch failed"
                );
                InvocationReport::partial(COMPONENT, format!("dispatch failed: {e}"))
                    .with_count("invoked", 0)
            }
        }
    }
}
