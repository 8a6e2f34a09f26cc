//! Versioned migration ledger for tenant namespaces.
//!
//! Every structural change a tenant namespace can receive is an explicit
//! [`ChangeUnit`] in this file, applied in order and recorded in the
//! namespace-local bookkeeping table. The DDL is idempotent
//! (`CREATE TABLE IF NOT EXISTS`) so re-applying a unit is always safe.

/// Namespace-local bookkeeping table recording applied change units.
pub const BOOKKEEPING_TABLE: &str = "schema_changes";

/// Sentinel record meaning "only the minimal onboarding set has been
/// applied; the full set is deferred". Removed by full provisioning.
pub const DEFERRED_SENTINEL: &str = "deferred.full-set";

/// One logical structural change applied to a tenant namespace.
///
/// `ddl` contains a `{schema}` placeholder the provisioner replaces with the
/// quoted namespace identifier before execution.
#[derive(Debug, Clone, Copy)]
pub struct ChangeUnit {
    pub id: &'static str,
    pub module: &'static str,
    pub table: &'static str,
    /// True for units belonging to the minimal onboarding set.
    pub onboarding: bool,
    pub ddl: &'static str,
}

/// The full ledger, in application order. Append-only: new units go at the
/// end with the next sequence number; existing entries are never edited.
pub const CHANGE_UNITS: &[ChangeUnit] = &[
    ChangeUnit {
        id: "0001_core_profiles",
        module: "core",
        table: "profiles",
        onboarding: true,
        ddl: r#"CREATE TABLE IF NOT EXISTS {schema}.profiles (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            user_id UUID NOT NULL,
            display_name TEXT NOT NULL,
            locale TEXT NOT NULL DEFAULT 'en',
            onboarded_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
    },
    ChangeUnit {
        id: "0002_core_settings",
        module: "core",
        table: "settings",
        onboarding: true,
        ddl: r#"CREATE TABLE IF NOT EXISTS {schema}.settings (
            key TEXT PRIMARY KEY,
            value JSONB NOT NULL DEFAULT '{}'::jsonb,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
    },
    ChangeUnit {
        id: "0003_billing_tax_rates",
        module: "billing",
        table: "tax_rates",
        onboarding: false,
        ddl: r#"CREATE TABLE IF NOT EXISTS {schema}.tax_rates (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL,
            rate_percent NUMERIC(6,3) NOT NULL,
            country TEXT NOT NULL,
            valid_from DATE NOT NULL,
            valid_until DATE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
    },
    ChangeUnit {
        id: "0004_billing_invoices",
        module: "billing",
        table: "invoices",
        onboarding: false,
        ddl: r#"CREATE TABLE IF NOT EXISTS {schema}.invoices (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            number TEXT NOT NULL UNIQUE,
            customer_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft',
            currency TEXT NOT NULL DEFAULT 'EUR',
            total_net NUMERIC(14,2) NOT NULL DEFAULT 0,
            total_tax NUMERIC(14,2) NOT NULL DEFAULT 0,
            issued_at TIMESTAMPTZ,
            due_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
    },
    ChangeUnit {
        id: "0005_billing_invoice_lines",
        module: "billing",
        table: "invoice_lines",
        onboarding: false,
        ddl: r#"CREATE TABLE IF NOT EXISTS {schema}.invoice_lines (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            invoice_id UUID NOT NULL REFERENCES {schema}.invoices(id) ON DELETE CASCADE,
            position INT NOT NULL,
            description TEXT NOT NULL,
            quantity NUMERIC(12,3) NOT NULL DEFAULT 1,
            unit_price NUMERIC(14,2) NOT NULL,
            tax_rate_id UUID REFERENCES {schema}.tax_rates(id),
            UNIQUE (invoice_id, position)
        )"#,
    },
    ChangeUnit {
        id: "0006_campaigns_campaigns",
        module: "campaigns",
        table: "campaigns",
        onboarding: false,
        ddl: r#"CREATE TABLE IF NOT EXISTS {schema}.campaigns (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL,
            channel TEXT NOT NULL,
            budget NUMERIC(14,2),
            starts_at TIMESTAMPTZ,
            ends_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
    },
    ChangeUnit {
        id: "0007_campaigns_metrics",
        module: "campaigns",
        table: "campaign_metrics",
        onboarding: false,
        ddl: r#"CREATE TABLE IF NOT EXISTS {schema}.campaign_metrics (
            campaign_id UUID NOT NULL REFERENCES {schema}.campaigns(id) ON DELETE CASCADE,
            day DATE NOT NULL,
            impressions BIGINT NOT NULL DEFAULT 0,
            clicks BIGINT NOT NULL DEFAULT 0,
            spend NUMERIC(14,2) NOT NULL DEFAULT 0,
            PRIMARY KEY (campaign_id, day)
        )"#,
    },
    ChangeUnit {
        id: "0008_marketplace_listings",
        module: "marketplace",
        table: "listings",
        onboarding: false,
        ddl: r#"CREATE TABLE IF NOT EXISTS {schema}.listings (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            title TEXT NOT NULL,
            marketplace TEXT NOT NULL,
            external_ref TEXT,
            price NUMERIC(14,2) NOT NULL,
            currency TEXT NOT NULL DEFAULT 'EUR',
            published BOOLEAN NOT NULL DEFAULT false,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
    },
    ChangeUnit {
        id: "0009_marketplace_offers",
        module: "marketplace",
        table: "listing_offers",
        onboarding: false,
        ddl: r#"CREATE TABLE IF NOT EXISTS {schema}.listing_offers (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            listing_id UUID NOT NULL REFERENCES {schema}.listings(id) ON DELETE CASCADE,
            buyer_ref TEXT NOT NULL,
            amount NUMERIC(14,2) NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
    },
    ChangeUnit {
        id: "0010_messaging_channels",
        module: "messaging",
        table: "channels",
        onboarding: false,
        ddl: r#"CREATE TABLE IF NOT EXISTS {schema}.channels (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            kind TEXT NOT NULL,
            address TEXT NOT NULL,
            verified BOOLEAN NOT NULL DEFAULT false,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (kind, address)
        )"#,
    },
    ChangeUnit {
        id: "0011_messaging_messages",
        module: "messaging",
        table: "messages",
        onboarding: false,
        ddl: r#"CREATE TABLE IF NOT EXISTS {schema}.messages (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            channel_id UUID NOT NULL REFERENCES {schema}.channels(id) ON DELETE CASCADE,
            direction TEXT NOT NULL,
            body TEXT NOT NULL,
            sent_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"#,
    },
];

/// Units belonging to the minimal onboarding set.
pub fn minimal_units() -> impl Iterator<Item = &'static ChangeUnit> {
    CHANGE_UNITS.iter().filter(|u| u.onboarding)
}

/// All tables a fully provisioned namespace must contain, bookkeeping
/// included. Sorted for stable comparison output.
pub fn expected_tables() -> Vec<&'static str> {
    let mut tables: Vec<&'static str> = CHANGE_UNITS.iter().map(|u| u.table).collect();
    tables.push(BOOKKEEPING_TABLE);
    tables.sort_unstable();
    tables
}

/// Tables present after minimal provisioning only.
pub fn minimal_tables() -> Vec<&'static str> {
    let mut tables: Vec<&'static str> = minimal_units().map(|u| u.table).collect();
    tables.push(BOOKKEEPING_TABLE);
    tables.sort_unstable();
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn unit_ids_are_unique_and_ordered() {
        let ids: Vec<&str> = CHANGE_UNITS.iter().map(|u| u.id).collect();
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(ids.len(), unique.len());

        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted, "ledger must stay in sequence order");
    }

    #[test]
    fn tables_are_unique() {
        let tables: HashSet<&str> = CHANGE_UNITS.iter().map(|u| u.table).collect();
        assert_eq!(tables.len(), CHANGE_UNITS.len());
        assert!(!tables.contains(BOOKKEEPING_TABLE));
    }

    #[test]
    fn ddl_is_idempotent_and_namespaced() {
        for unit in CHANGE_UNITS {
            assert!(unit.ddl.contains("IF NOT EXISTS"), "{} must be idempotent", unit.id);
            assert!(unit.ddl.contains("{schema}."), "{} must be namespace-qualified", unit.id);
        }
    }

    #[test]
    fn minimal_set_is_a_strict_subset() {
        let minimal = minimal_tables();
        let expected = expected_tables();
        assert!(minimal.len() < expected.len());
        for table in &minimal {
            assert!(expected.contains(table));
        }
    }

    #[test]
    fn onboarding_units_lead_the_ledger() {
        // Minimal units must apply cleanly on their own, so they cannot
        // reference tables created by later units.
        let first_full = CHANGE_UNITS.iter().position(|u| !u.onboarding).unwrap();
        assert!(CHANGE_UNITS[..first_full].iter().all(|u| u.onboarding));
        assert!(CHANGE_UNITS[first_full..].iter().all(|u| !u.onboarding));
    }

    #[test]
    fn sentinel_is_not_a_unit_id() {
        assert!(CHANGE_UNITS.iter().all(|u| u.id != DEFERRED_SENTINEL));
    }
}
