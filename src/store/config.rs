use crate::error::{Result, StoreError};
use crate::pool::PoolManager;
use crate::store::instances::{insert_instance, remove_instance, InstanceStore};
use crate::store::model::{parse_uaa_auth, BrokerConfiguration, ConfigEntry, UaaAuth};
use tokio_postgres::Row;
use tracing::{debug, info};

/// Key/value access to the Config table.
///
/// KEY is not unique on its own; rows are addressed by the
/// (KEY, COMPONENT) pair.
pub struct ConfigStore<'a> {
    manager: &'a PoolManager,
}

impl<'a> ConfigStore<'a> {
    pub fn new(manager: &'a PoolManager) -> Self {
        Self { manager }
    }

    pub async fn get_entry(&self, key: &str, component: &str) -> Result<Option<ConfigEntry>> {
        let client = self.manager.client().await?;

        let row = client
            .query_opt(
                r#"SELECT "KEY", "VALUE", "COMPONENT" FROM "Config" WHERE "KEY" = $1 AND "COMPONENT" = $2 LIMIT 1"#,
                &[&key, &component],
            )
            .await
            .map_err(|e| StoreError::query("config lookup", e))?;

        Ok(row.as_ref().map(entry_from_row))
    }

    /// Value for (KEY, COMPONENT); a missing row and a NULL value both give `None`.
    pub async fn get_value(&self, key: &str, component: &str) -> Result<Option<String>> {
        Ok(self.get_entry(key, component).await?.and_then(|e| e.value))
    }

    pub async fn list_entries(&self, component: Option<&str>) -> Result<Vec<ConfigEntry>> {
        let client = self.manager.client().await?;

        let rows = match component {
            Some(component) => {
                client
                    .query(
                        r#"SELECT "KEY", "VALUE", "COMPONENT" FROM "Config" WHERE "COMPONENT" = $1 ORDER BY "KEY""#,
                        &[&component],
                    )
                    .await
            }
            None => {
                client
                    .query(
                        r#"SELECT "KEY", "VALUE", "COMPONENT" FROM "Config" ORDER BY "COMPONENT", "KEY""#,
                        &[],
                    )
                    .await
            }
        }
        .map_err(|e| StoreError::query("config list", e))?;

        Ok(rows.iter().map(entry_from_row).collect())
    }

    /// Replace every row for (KEY, COMPONENT) with a single row holding `value`.
    pub async fn set_value(&self, key: &str, component: &str, value: &str) -> Result<()> {
        if value.chars().count() > 1000 {
            return Err(StoreError::InvalidRequest {
                message: format!("Value for {}/{} exceeds 1000 characters", component, key),
            });
        }

        let mut client = self.manager.client().await?;
        let tx = client.transaction().await?;

        tx.execute(
            r#"DELETE FROM "Config" WHERE "KEY" = $1 AND "COMPONENT" = $2"#,
            &[&key, &component],
        )
        .await
        .map_err(|e| StoreError::query("config replace", e))?;

        tx.execute(
            r#"INSERT INTO "Config" ("KEY", "VALUE", "COMPONENT") VALUES ($1, $2, $3)"#,
            &[&key, &value, &component],
        )
        .await
        .map_err(|e| StoreError::query("config insert", e))?;

        tx.commit().await?;

        debug!("Set config {}/{}", component, key);
        Ok(())
    }

    /// Remove every row for (KEY, COMPONENT).
    pub async fn delete_value(&self, key: &str, component: &str) -> Result<u64> {
        let client = self.manager.client().await?;

        let removed = client
            .execute(
                r#"DELETE FROM "Config" WHERE "KEY" = $1 AND "COMPONENT" = $2"#,
                &[&key, &component],
            )
            .await
            .map_err(|e| StoreError::query("config delete", e))?;

        if removed == 0 {
            return Err(StoreError::not_found("Config", format!("{}/{}", component, key)));
        }

        Ok(removed)
    }

    /// Typed settings from the Config rows, plus every stored instance.
    pub async fn load_configuration(&self) -> Result<BrokerConfiguration> {
        let entries = self.list_entries(None).await?;
        let mut configuration = BrokerConfiguration::from_entries(&entries)?;
        configuration.instances = InstanceStore::new(self.manager).load_all().await?;
        Ok(configuration)
    }

    /// Persist `config` into the Config table.
    ///
    /// With `overwrite` every existing row is replaced. Without it only the
    /// (KEY, COMPONENT) pairs that are absent get written, leaving operator
    /// edits alone. Instances follow the same rule: replaced when
    /// overwriting, otherwise only added when their guid is unknown.
    /// Returns the number of Config rows inserted.
    pub async fn save_configuration(
        &self,
        config: &BrokerConfiguration,
        overwrite: bool,
    ) -> Result<usize> {
        let entries = config.to_entries();
        let mut client = self.manager.client().await?;
        let tx = client.transaction().await?;

        if overwrite {
            tx.execute(r#"DELETE FROM "Config""#, &[])
                .await
                .map_err(|e| StoreError::query("config overwrite", e))?;
        }

        let mut inserted = 0;
        for entry in &entries {
            let sql = if overwrite {
                r#"INSERT INTO "Config" ("KEY", "VALUE", "COMPONENT") VALUES ($1, $2, $3)"#
            } else if is_multi_valued(&entry.key) {
                // NATS members repeat the key, so match on the value as well
                r#"INSERT INTO "Config" ("KEY", "VALUE", "COMPONENT")
                   SELECT $1::varchar, $2::varchar, $3::varchar
                   WHERE NOT EXISTS (
                       SELECT 1 FROM "Config"
                       WHERE "KEY" = $1 AND "COMPONENT" = $3 AND "VALUE" IS NOT DISTINCT FROM $2
                   )"#
            } else {
                r#"INSERT INTO "Config" ("KEY", "VALUE", "COMPONENT")
                   SELECT $1::varchar, $2::varchar, $3::varchar
                   WHERE NOT EXISTS (SELECT 1 FROM "Config" WHERE "KEY" = $1 AND "COMPONENT" = $3)"#
            };

            let affected = tx
                .execute(sql, &[&entry.key, &entry.value, &entry.component])
                .await
                .map_err(|e| StoreError::query(format!("config save {}", entry.key), e))?;
            inserted += affected as usize;
        }

        let mut instances_written = 0;
        for (instance_id, instance) in &config.instances {
            if overwrite {
                remove_instance(&tx, instance_id).await?;
            } else {
                let exists: bool = tx
                    .query_one(
                        r#"SELECT EXISTS(SELECT 1 FROM "Instances" WHERE "Guid" = $1)"#,
                        &[instance_id],
                    )
                    .await
                    .map_err(|e| StoreError::query(format!("config save instance {}", instance_id), e))?
                    .get(0);
                if exists {
                    continue;
                }
            }

            insert_instance(&tx, instance_id, instance).await?;
            instances_written += 1;
        }

        tx.commit().await?;

        info!(
            "Saved broker configuration: {} rows and {} instances written (overwrite={})",
            inserted, instances_written, overwrite
        );
        Ok(inserted)
    }

    pub async fn uaa_auth(&self) -> Result<UaaAuth> {
        let raw = self
            .get_value("AUTHENTICATION", "MANAGEMENT_API")
            .await?
            .ok_or_else(|| StoreError::not_found("Config", "MANAGEMENT_API/AUTHENTICATION"))?;

        let value: serde_json::Value = serde_json::from_str(&raw)?;
        parse_uaa_auth(&value)
    }
}

fn is_multi_valued(key: &str) -> bool {
    key.starts_with("NATS_")
}

fn entry_from_row(row: &Row) -> ConfigEntry {
    ConfigEntry {
        key: row.get(0),
        value: row.get(1),
        component: row.get(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_valued_keys() {
        assert!(is_multi_valued("NATS_MEMBER"));
        assert!(is_multi_valued("NATS_MEMEBER"));
        assert!(!is_multi_valued("LISTEN"));
    }
}
