//! Exchange/queue/binding graph, computed as a plain value per lane.
//!
//! The graph is:
//! - a fanout dead-letter exchange bound to a single dead-letter queue,
//! - a delayed-delivery topic exchange for all work,
//! - one durable queue per [`QueueSpec`], bound under its lane-scoped routing
//!   key and dead-lettering into the fanout exchange.
//!
//! Queues of non-production lanes expire after a day of idleness so that
//! abandoned lanes clean themselves up; production queues never expire.

use crate::lane::{self, Lane};
use std::collections::BTreeMap;
use std::time::Duration;

pub const EXCHANGE: &str = "post_processing";
pub const DEAD_LETTER_EXCHANGE: &str = "post_processing_dlx";
pub const DEAD_LETTER_QUEUE: &str = "dead_letters";

/// Idle expiry of non-production queues.
pub const LANE_QUEUE_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

pub const ARG_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
pub const ARG_EXPIRES: &str = "x-expires";
pub const ARG_DELAYED_TYPE: &str = "x-delayed-type";
/// Message header carrying the delivery delay in milliseconds.
pub const HEADER_DELAY: &str = "x-delay";

/// A work queue before lane scoping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSpec {
    pub base_name: &'static str,
    pub base_routing_key: &'static str,
}

impl QueueSpec {
    pub fn queue_name(&self, lane: Option<&Lane>) -> String {
        lane::queue_name(self.base_name, lane)
    }

    pub fn routing_key(&self, lane: Option<&Lane>) -> String {
        lane::routing_key(self.base_routing_key, lane)
    }
}

pub const SAFETY_CHECK: QueueSpec = QueueSpec {
    base_name: "safety_check",
    base_routing_key: "post.safety.check",
};

pub const RECALL: QueueSpec = QueueSpec {
    base_name: "recall",
    base_routing_key: "action.recall",
};

pub const VECTORIZE: QueueSpec = QueueSpec {
    base_name: "vectorize",
    base_routing_key: "task.vectorize",
};

pub const WORK_QUEUES: [QueueSpec; 3] = [SAFETY_CHECK, RECALL, VECTORIZE];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Str(String),
    Int(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Fanout,
    /// `x-delayed-message` exchange routing like a topic exchange.
    DelayedTopic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDecl {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
    pub arguments: BTreeMap<String, ArgValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDecl {
    pub name: String,
    pub durable: bool,
    pub arguments: BTreeMap<String, ArgValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

/// Everything `declare_topology` asserts on the broker, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyPlan {
    pub lane: Option<Lane>,
    pub exchanges: Vec<ExchangeDecl>,
    pub queues: Vec<QueueDecl>,
    pub bindings: Vec<Binding>,
}

impl TopologyPlan {
    pub fn for_lane(lane: Option<&Lane>, specs: &[QueueSpec]) -> Self {
        let exchanges = vec![
            ExchangeDecl {
                name: DEAD_LETTER_EXCHANGE.to_string(),
                kind: ExchangeKind::Fanout,
                durable: true,
                arguments: BTreeMap::new(),
            },
            ExchangeDecl {
                name: EXCHANGE.to_string(),
                kind: ExchangeKind::DelayedTopic,
                durable: true,
                arguments: BTreeMap::from([(
                    ARG_DELAYED_TYPE.to_string(),
                    ArgValue::Str("topic".to_string()),
                )]),
            },
        ];

        let mut queues = vec![QueueDecl {
            name: DEAD_LETTER_QUEUE.to_string(),
            durable: true,
            arguments: BTreeMap::new(),
        }];
        let mut bindings = vec![Binding {
            queue: DEAD_LETTER_QUEUE.to_string(),
            exchange: DEAD_LETTER_EXCHANGE.to_string(),
            routing_key: String::new(),
        }];

        let mut work_args = BTreeMap::from([(
            ARG_DEAD_LETTER_EXCHANGE.to_string(),
            ArgValue::Str(DEAD_LETTER_EXCHANGE.to_string()),
        )]);
        if lane.is_some() {
            work_args.insert(
                ARG_EXPIRES.to_string(),
                ArgValue::Int(LANE_QUEUE_EXPIRY.as_millis() as i64),
            );
        }

        for spec in specs {
            let name = spec.queue_name(lane);
            queues.push(QueueDecl {
                name: name.clone(),
                durable: true,
                arguments: work_args.clone(),
            });
            bindings.push(Binding {
                queue: name,
                exchange: EXCHANGE.to_string(),
                routing_key: spec.routing_key(lane),
            });
        }

        Self {
            lane: lane.cloned(),
            exchanges,
            queues,
            bindings,
        }
    }
}
