//! Entity id minting.
//!
//! Every row key has the shape `rd_<tag>_<32 hex chars>`: a short per-table
//! tag behind the `rd_` brand marker, then a hyphenless v4 UUID. The tag
//! makes an id self-describing when it turns up in a log line or a provider
//! dashboard, and the brand marker keeps our keys from ever being mistaken
//! for provider-issued identifiers (payment intents, Cloudinary public ids,
//! provider message ids).

use uuid::Uuid;

fn mint(tag: &str) -> String {
    format!("rd_{}_{}", tag, Uuid::new_v4().as_simple())
}

pub fn user() -> String {
    mint("usr")
}

pub fn store() -> String {
    mint("str")
}

pub fn order() -> String {
    mint("ord")
}

/// Key for a payment_transactions row (not the provider's transaction id,
/// which we store alongside it).
pub fn payment() -> String {
    mint("txn")
}

pub fn receipt() -> String {
    mint("rcp")
}

pub fn webhook_log() -> String {
    mint("whk")
}

/// Key for a broker jobs row (distinct from the job's reserved dedup
/// `job_id`, which callers choose).
pub fn job() -> String {
    mint("job")
}

pub fn job_log() -> String {
    mint("jlog")
}

pub fn email_log() -> String {
    mint("eml")
}

pub fn cloud_storage_log() -> String {
    mint("cs")
}
