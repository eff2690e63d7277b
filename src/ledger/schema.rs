//! Ledger table schema definitions using sea-query.

use sea_query::Iden;

/// `db_change_log` table schema.
#[derive(Iden)]
pub enum DbChangeLog {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "topic"]
    Topic,
    #[iden = "ingression_ts"]
    IngressionTs,
    #[iden = "headers"]
    Headers,
    #[iden = "message"]
    Message,
    #[iden = "status"]
    Status,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "modified_at"]
    ModifiedAt,
}

/// Columns selected when reading a full ledger row.
pub const RECORD_COLUMNS: [DbChangeLog; 8] = [
    DbChangeLog::Id,
    DbChangeLog::Topic,
    DbChangeLog::IngressionTs,
    DbChangeLog::Headers,
    DbChangeLog::Message,
    DbChangeLog::Status,
    DbChangeLog::CreatedAt,
    DbChangeLog::ModifiedAt,
];
