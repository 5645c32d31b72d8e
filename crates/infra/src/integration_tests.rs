//! Integration tests for the full refresh pipeline.
//!
//! Tests: Descriptors → Refresher → TransactionCoordinator → InMemoryCatalogStore
//!
//! Verifies:
//! - Repeated refreshes converge and stop writing
//! - References resolve to the persisted instance per natural id
//! - Organizations are isolated
//! - Concurrent refreshes of the same org both succeed through the retry protocol
//! - Caller-owned transactions are honoured

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use catalog_core::{CatalogEntity, EntityKind, OrgId};
    use catalog_model::{
        Branding, BrandingData, ContentData, ProductData, SubscriptionData, SubscriptionRef,
    };
    use catalog_refresh::{CatalogStore, EntityState, RefreshConfig, Refresher};

    use crate::catalog_store::InMemoryCatalogStore;

    fn test_org_id() -> OrgId {
        OrgId::new()
    }

    fn init_tracing() {
        catalog_observability::init();
    }

    fn premium_subscription(content_url: &str) -> SubscriptionRef {
        SubscriptionData::new("sub-1")
            .with_order_number("order-1")
            .with_product(
                ProductData::new("mkt-premium")
                    .with_name("Premium")
                    .with_attribute("support_level", "premium")
                    .with_derived(ProductData::new("mkt-derived").with_name("Derived"))
                    .with_provided(
                        ProductData::new("eng-rhel")
                            .with_name("RHEL")
                            .with_content(
                                ContentData::new("cid-base").with_content_url(content_url),
                                true,
                            )
                            .with_content(ContentData::new("cid-extras"), false),
                    ),
            )
            .shared()
    }

    #[test]
    fn first_refresh_creates_whole_closure() {
        init_tracing();
        let store = InMemoryCatalogStore::new();
        let org_id = test_org_id();

        let mut refresher = Refresher::new(&store);
        refresher
            .add_subscriptions([premium_subscription("/repo/base")])
            .unwrap();
        let result = refresher.execute(org_id).unwrap();

        assert_eq!(result.products().len(), 3);
        assert_eq!(result.content().len(), 2);
        assert_eq!(result.products_in(&[EntityState::Created]).count(), 3);
        assert_eq!(store.product_count(org_id), 3);
        assert_eq!(store.content_count(org_id), 2);

        let premium = store.product(org_id, "mkt-premium").unwrap();
        let derived = store.product(org_id, "mkt-derived").unwrap();
        assert_eq!(premium.derived_product(), Some(&derived.entity_ref()));

        let rhel = store.product(org_id, "eng-rhel").unwrap();
        let base = store.content(org_id, "cid-base").unwrap();
        assert_eq!(rhel.product_content()["cid-base"].content.uuid, base.uuid());
        assert!(!rhel.product_content()["cid-extras"].enabled);
    }

    #[test]
    fn repeated_refresh_is_unchanged() {
        init_tracing();
        let store = InMemoryCatalogStore::new();
        let org_id = test_org_id();

        let run = || {
            let mut refresher = Refresher::new(&store);
            refresher
                .add_subscriptions([premium_subscription("/repo/base")])
                .unwrap();
            refresher.execute(org_id).unwrap()
        };

        let first = run();
        let second = run();

        assert_eq!(
            second
                .products_in(&[EntityState::Created, EntityState::Updated])
                .count(),
            0
        );
        assert_eq!(
            second
                .content_in(&[EntityState::Created, EntityState::Updated])
                .count(),
            0
        );
        for (id, product) in first.products() {
            assert_eq!(second.products()[id].uuid(), product.uuid());
        }
    }

    #[test]
    fn changed_content_is_updated_in_place() {
        init_tracing();
        let store = InMemoryCatalogStore::new();
        let org_id = test_org_id();

        let mut first = Refresher::new(&store);
        first
            .add_subscriptions([premium_subscription("/repo/base")])
            .unwrap();
        first.execute(org_id).unwrap();
        let before = store.content(org_id, "cid-base").unwrap();

        let mut second = Refresher::new(&store);
        second
            .add_subscriptions([premium_subscription("/repo/base-v2")])
            .unwrap();
        let result = second.execute(org_id).unwrap();

        assert_eq!(
            result.entity_state(EntityKind::Content, "cid-base"),
            Some(EntityState::Updated)
        );
        assert_eq!(
            result.entity_state(EntityKind::Product, "eng-rhel"),
            Some(EntityState::Unchanged)
        );
        let after = store.content(org_id, "cid-base").unwrap();
        assert_eq!(after.uuid(), before.uuid());
        assert_eq!(after.content_url(), Some("/repo/base-v2"));
        assert_eq!(store.content_count(org_id), 2);
    }

    #[test]
    fn organizations_are_isolated() {
        init_tracing();
        let store = InMemoryCatalogStore::new();
        let (org_a, org_b) = (test_org_id(), test_org_id());

        for org_id in [org_a, org_b] {
            let mut refresher = Refresher::new(&store);
            refresher
                .add_subscriptions([premium_subscription("/repo/base")])
                .unwrap();
            let result = refresher.execute(org_id).unwrap();
            assert_eq!(result.products_in(&[EntityState::Created]).count(), 3);
        }

        let a = store.product(org_a, "mkt-premium").unwrap();
        let b = store.product(org_b, "mkt-premium").unwrap();
        assert_ne!(a.uuid(), b.uuid());
    }

    #[test]
    fn concurrent_refreshes_of_same_org_converge() {
        init_tracing();
        let store = Arc::new(InMemoryCatalogStore::new());
        let org_id = test_org_id();
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut refresher = Refresher::new(store)
                        .with_config(RefreshConfig::default().with_max_retries(5));
                    refresher
                        .add_subscriptions([premium_subscription("/repo/base")])
                        .unwrap();
                    barrier.wait();
                    refresher.execute(org_id)
                })
            })
            .collect();

        for handle in handles {
            let result = handle.join().unwrap();
            assert!(result.is_ok(), "refresh failed: {:?}", result.err());
        }

        assert_eq!(store.product_count(org_id), 3);
        assert_eq!(store.content_count(org_id), 2);
    }

    #[test]
    fn caller_owned_transaction_controls_visibility() {
        init_tracing();
        let store = InMemoryCatalogStore::new();
        let org_id = test_org_id();

        store.begin().unwrap();
        let mut refresher = Refresher::new(&store);
        refresher
            .add_subscriptions([premium_subscription("/repo/base")])
            .unwrap();
        let result = refresher.execute(org_id).unwrap();

        assert_eq!(result.products().len(), 3);
        assert!(store.in_transaction());
        assert_eq!(store.product_count(org_id), 0);

        store.rollback().unwrap();

        assert_eq!(store.product_count(org_id), 0);
        assert_eq!(store.content_count(org_id), 0);
    }

    #[test]
    fn entities_dropped_upstream_are_kept_and_reported() {
        init_tracing();
        let store = InMemoryCatalogStore::new();
        let org_id = test_org_id();

        let mut first = Refresher::new(&store);
        first
            .add_subscriptions([premium_subscription("/repo/base")])
            .unwrap();
        first.execute(org_id).unwrap();

        // Upstream now only sends the marketing product itself; its stored references
        // still point at the derived and engineering products.
        let mut second = Refresher::new(&store);
        second
            .add_products([ProductData::new("mkt-premium").with_name("Premium").shared()])
            .unwrap();
        let result = second.execute(org_id).unwrap();

        assert_eq!(result.products().len(), 3);
        assert_eq!(result.content().len(), 2);
        for id in ["eng-rhel", "mkt-derived"] {
            assert_eq!(
                result.entity_state(EntityKind::Product, id),
                Some(EntityState::Unchanged)
            );
        }
        // The derived product reference is cleared when the descriptor omits it.
        assert_eq!(
            result.entity_state(EntityKind::Product, "mkt-premium"),
            Some(EntityState::Updated)
        );
        let premium = store.product(org_id, "mkt-premium").unwrap();
        assert_eq!(premium.derived_product(), None);
        assert_eq!(premium.provided_products().len(), 1);
        assert_eq!(store.product_count(org_id), 3);
    }

    #[test]
    fn rebranding_updates_product_and_omitted_branding_keeps_it() {
        init_tracing();
        let store = InMemoryCatalogStore::new();
        let org_id = test_org_id();
        let refresh = |product: ProductData| {
            let mut refresher = Refresher::new(&store);
            refresher.add_products([product.shared()]).unwrap();
            refresher.execute(org_id).unwrap()
        };

        refresh(
            ProductData::new("eng-rhel").with_branding(BrandingData::new("eng-rhel", "RHEL", "OS")),
        );

        let rebranded = refresh(
            ProductData::new("eng-rhel")
                .with_branding(BrandingData::new("eng-rhel", "RHEL Server", "OS")),
        );
        assert_eq!(
            rebranded.entity_state(EntityKind::Product, "eng-rhel"),
            Some(EntityState::Updated)
        );

        let omitted = refresh(ProductData::new("eng-rhel"));
        assert_eq!(
            omitted.entity_state(EntityKind::Product, "eng-rhel"),
            Some(EntityState::Unchanged)
        );

        let stored = store.product(org_id, "eng-rhel").unwrap();
        assert_eq!(
            stored.branding().iter().collect::<Vec<_>>(),
            vec![&Branding::new("eng-rhel", "RHEL Server", "OS")]
        );
    }

    #[test]
    fn result_serializes_to_json() {
        init_tracing();
        let store = InMemoryCatalogStore::new();
        let mut refresher = Refresher::new(&store);
        refresher
            .add_content([ContentData::new("cid-1").with_name("Base").shared()])
            .unwrap();

        let result = refresher.execute(test_org_id()).unwrap();
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["states"]["content"]["cid-1"], "created");
        assert_eq!(json["content"]["cid-1"]["name"], "Base");
    }
}
