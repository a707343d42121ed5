//! Key resolution: name templates, TTL suffixes and key expressions

pub mod duration;
pub mod expression;
pub mod resolver;

pub use duration::{format_duration, parse_duration};
pub use expression::{CallContext, KeyEvaluator, TemplateEvaluator};
pub use resolver::{
    lock_name, parse_name_template, KeyResolver, ResolvedKey, KEY_SEPARATOR, RW_LOCK_SUFFIX,
    SYNC_LOCK_SUFFIX, TTL_SEPARATOR,
};
