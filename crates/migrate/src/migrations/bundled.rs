//! Bundled migrations
//!
//! Migrations are embedded at compile time using include_str!, one folder per backend.

use crate::backends::BackendType;

/// `(file name, content)` pairs
pub type BundledResource = (&'static str, &'static str);

const POSTGRESQL: &[BundledResource] = &[
    (
        "202501010000_Create_feature_flags_table.sql",
        include_str!("../../migrations/postgresql/202501010000_Create_feature_flags_table.sql"),
    ),
    (
        "202501020000_Create_feature_flags_metadata_table.sql",
        include_str!("../../migrations/postgresql/202501020000_Create_feature_flags_metadata_table.sql"),
    ),
    (
        "202501030000_Create_feature_flags_audit_table.sql",
        include_str!("../../migrations/postgresql/202501030000_Create_feature_flags_audit_table.sql"),
    ),
];

const SQLSERVER: &[BundledResource] = &[
    (
        "202501010000_Create_feature_flags_table.sql",
        include_str!("../../migrations/sqlserver/202501010000_Create_feature_flags_table.sql"),
    ),
    (
        "202501020000_Create_feature_flags_metadata_table.sql",
        include_str!("../../migrations/sqlserver/202501020000_Create_feature_flags_metadata_table.sql"),
    ),
    (
        "202501030000_Create_feature_flags_audit_table.sql",
        include_str!("../../migrations/sqlserver/202501030000_Create_feature_flags_audit_table.sql"),
    ),
];

/// Resources bundled for a backend
pub fn resources(backend: BackendType) -> &'static [BundledResource] {
    match backend {
        BackendType::PostgreSQL => POSTGRESQL,
        BackendType::SqlServer => SQLSERVER,
    }
}
