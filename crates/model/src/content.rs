//! Persisted content entity.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use catalog_core::{CatalogEntity, EntityKind, EntityUuid, NaturalId, OrgId};

use crate::info::ContentInfo;

/// Organization-scoped content record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    uuid: EntityUuid,
    id: NaturalId,
    org_id: OrgId,
    name: Option<String>,
    content_type: Option<String>,
    label: Option<String>,
    vendor: Option<String>,
    content_url: Option<String>,
    gpg_url: Option<String>,
    required_tags: Option<String>,
    release_version: Option<String>,
    arches: Option<String>,
    metadata_expiration: Option<i64>,
    required_product_ids: BTreeSet<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Content {
    pub fn new(org_id: OrgId, uuid: EntityUuid, id: NaturalId, now: DateTime<Utc>) -> Self {
        Self {
            uuid,
            id,
            org_id,
            name: None,
            content_type: None,
            label: None,
            vendor: None,
            content_url: None,
            gpg_url: None,
            required_tags: None,
            release_version: None,
            arches: None,
            metadata_expiration: None,
            required_product_ids: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_content_url(mut self, url: impl Into<String>) -> Self {
        self.content_url = blank_to_none(&url.into());
        self
    }

    pub fn id(&self) -> &NaturalId {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn vendor(&self) -> Option<&str> {
        self.vendor.as_deref()
    }

    pub fn content_url(&self) -> Option<&str> {
        self.content_url.as_deref()
    }

    pub fn gpg_url(&self) -> Option<&str> {
        self.gpg_url.as_deref()
    }

    pub fn required_tags(&self) -> Option<&str> {
        self.required_tags.as_deref()
    }

    pub fn release_version(&self) -> Option<&str> {
        self.release_version.as_deref()
    }

    pub fn arches(&self) -> Option<&str> {
        self.arches.as_deref()
    }

    pub fn metadata_expiration(&self) -> Option<i64> {
        self.metadata_expiration
    }

    pub fn required_product_ids(&self) -> &BTreeSet<String> {
        &self.required_product_ids
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    /// Apply a descriptor onto this content. `None` fields leave the current value alone.
    ///
    /// URL, tag, arch and release fields are stored as `None` when upstream sends an empty
    /// string, so `""` and `None` never register as a difference.
    pub fn apply_changes(&mut self, update: &dyn ContentInfo) {
        assign(&mut self.name, update.name());
        assign(&mut self.content_type, update.content_type());
        assign(&mut self.label, update.label());
        assign(&mut self.vendor, update.vendor());

        assign_blank_as_none(&mut self.content_url, update.content_url());
        assign_blank_as_none(&mut self.gpg_url, update.gpg_url());
        assign_blank_as_none(&mut self.required_tags, update.required_tags());
        assign_blank_as_none(&mut self.release_version, update.release_version());
        assign_blank_as_none(&mut self.arches, update.arches());

        if let Some(expiration) = update.metadata_expiration() {
            self.metadata_expiration = Some(expiration);
        }

        if let Some(ids) = update.required_product_ids() {
            self.required_product_ids = ids.iter().cloned().collect();
        }
    }

    /// Whether both records hold the same data, ignoring audit timestamps.
    pub fn same_state_as(&self, other: &Content) -> bool {
        self.uuid == other.uuid
            && self.id == other.id
            && self.org_id == other.org_id
            && self.name == other.name
            && self.content_type == other.content_type
            && self.label == other.label
            && self.vendor == other.vendor
            && self.content_url == other.content_url
            && self.gpg_url == other.gpg_url
            && self.required_tags == other.required_tags
            && self.release_version == other.release_version
            && self.arches == other.arches
            && self.metadata_expiration == other.metadata_expiration
            && self.required_product_ids == other.required_product_ids
    }
}

impl CatalogEntity for Content {
    const KIND: EntityKind = EntityKind::Content;

    fn uuid(&self) -> EntityUuid {
        self.uuid
    }

    fn natural_id(&self) -> &NaturalId {
        &self.id
    }

    fn org_id(&self) -> OrgId {
        self.org_id
    }
}

fn assign(field: &mut Option<String>, value: Option<&str>) {
    if let Some(value) = value {
        *field = Some(value.to_string());
    }
}

fn assign_blank_as_none(field: &mut Option<String>, value: Option<&str>) {
    if let Some(value) = value {
        *field = blank_to_none(value);
    }
}

fn blank_to_none(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
