use super::database::Transaction;
use crate::domain::audit::{AuditAction, AuditRecord, ResourceType};
use crate::domain::idempotency::IdempotencyKey;
use crate::domain::ports::{Clock, Table};
use crate::error::Result;
use serde::Serialize;
use std::sync::Arc;

/// Appends audit records for the request being served.
///
/// Records are written through the phase's transaction, so they commit or
/// vanish together with the mutation they describe.
#[derive(Clone)]
pub struct AuditTrail {
    origin_ip: String,
    clock: Arc<dyn Clock>,
}

impl AuditTrail {
    pub fn new(origin_ip: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            origin_ip: origin_ip.into(),
            clock,
        }
    }

    pub async fn record<S: Serialize + ?Sized>(
        &self,
        tx: &mut Transaction,
        key: &IdempotencyKey,
        action: AuditAction,
        resource_type: ResourceType,
        resource_id: u64,
        snapshot: &S,
    ) -> Result<AuditRecord> {
        let id = tx.next_id(Table::AuditRecords.name()).await?;
        let record = AuditRecord {
            id,
            action,
            resource_type,
            resource_id,
            data: serde_json::to_value(snapshot)?,
            origin_ip: self.origin_ip.clone(),
            owner: key.owner,
            recorded_at: self.clock.now(),
        };
        tx.put(
            Table::AuditRecords,
            &AuditRecord::storage_key(resource_type, resource_id, id),
            &record,
        )?;
        Ok(record)
    }
}
