mod migration;
mod seeder;

pub use migration::{AppliedMigration, Migration, MigrationRunner, MigrationStatus};
pub use seeder::{
    parse_seed_rows, split_statements, SeedResult, SeedRow, SeedRunner, SeedValidation,
    DEFAULT_SEED,
};
