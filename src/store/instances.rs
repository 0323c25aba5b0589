use crate::error::{Result, StoreError};
use crate::pool::PoolManager;
use crate::store::model::{decode_json, encode_json, CatalogService, Dial, Instance, Plan};
use std::collections::BTreeMap;
use tokio_postgres::{Client, Row, Transaction};
use tracing::{debug, info};

const INSTANCE_COLUMNS: &str = r#""Guid", "Name", "TargetURL", "AuthKey", "CaCert", "SkipSSL""#;
const PLAN_COLUMNS: &str = r#""Guid", "Name", "Description", "Free", "Metadata""#;
const SERVICE_COLUMNS: &str = r#""Guid", "Bindable", "DashboardClient", "Description", "Metadata", "Name", "PlanUpdateable", "Tags", "Instances_Guid", "Requires""#;

/// Access to driver instances and the dials, plans and services hanging off them.
///
/// The schema carries no foreign keys, so the cascades live here: every
/// multi-table write runs in one transaction.
pub struct InstanceStore<'a> {
    manager: &'a PoolManager,
}

impl<'a> InstanceStore<'a> {
    pub fn new(manager: &'a PoolManager) -> Self {
        Self { manager }
    }

    /// Insert an instance together with its dials (and their plans) and service.
    pub async fn set_instance(&self, instance_id: &str, instance: &Instance) -> Result<()> {
        let mut client = self.manager.client().await?;
        let tx = client.transaction().await?;

        insert_instance(&tx, instance_id, instance).await?;

        tx.commit().await?;

        info!(
            "Stored instance {} ({}) with {} dials",
            instance_id,
            instance.name,
            instance.dials.len()
        );
        Ok(())
    }

    /// Instance row only, without dials or service.
    pub async fn get_instance(&self, instance_id: &str) -> Result<Instance> {
        let client = self.manager.client().await?;
        fetch_instance_row(&client, instance_id).await
    }

    /// Instance with its dials, plans and service.
    pub async fn load_instance(&self, instance_id: &str) -> Result<Instance> {
        let client = self.manager.client().await?;

        let mut instance = fetch_instance_row(&client, instance_id).await?;

        let rows = client
            .query(
                r#"SELECT d."Guid", d."Configuration", p."Guid", p."Name", p."Description", p."Free", p."Metadata"
                   FROM "Dials" d
                   JOIN "Plans" p ON p."Guid" = d."Plans_Guid"
                   WHERE d."Instances_Guid" = $1"#,
                &[&instance_id],
            )
            .await
            .map_err(|e| StoreError::query(format!("load dials for {}", instance_id), e))?;

        for row in &rows {
            let dial_id: String = row.get(0);
            let configuration = decode_json(row.get(1))?;
            let plan = plan_from_row(row, 2)?;
            instance.dials.insert(dial_id, Dial { plan, configuration });
        }

        let service_row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM \"Services\" WHERE \"Instances_Guid\" = $1 LIMIT 1",
                    SERVICE_COLUMNS
                ),
                &[&instance_id],
            )
            .await
            .map_err(|e| StoreError::query(format!("load service for {}", instance_id), e))?;

        instance.service = service_row.as_ref().map(service_from_row).transpose()?;

        Ok(instance)
    }

    pub async fn list_instance_guids(&self) -> Result<Vec<String>> {
        let client = self.manager.client().await?;

        let rows = client
            .query(r#"SELECT "Guid" FROM "Instances" ORDER BY "Guid""#, &[])
            .await
            .map_err(|e| StoreError::query("list instances", e))?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    pub async fn load_all(&self) -> Result<BTreeMap<String, Instance>> {
        let mut instances = BTreeMap::new();
        for guid in self.list_instance_guids().await? {
            let instance = self.load_instance(&guid).await?;
            instances.insert(guid, instance);
        }
        Ok(instances)
    }

    /// Remove an instance with its dials, their plans and its services.
    pub async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        let mut client = self.manager.client().await?;
        let tx = client.transaction().await?;

        let (removed, plans) = remove_instance(&tx, instance_id).await?;
        if removed == 0 {
            // Dropping the transaction rolls it back
            return Err(StoreError::not_found("Instance", instance_id));
        }

        tx.commit().await?;

        info!("Deleted instance {} ({} dials/plans)", instance_id, plans);
        Ok(())
    }

    pub async fn instance_name_exists(&self, name: &str) -> Result<bool> {
        let client = self.manager.client().await?;

        let row = client
            .query_one(
                r#"SELECT EXISTS(SELECT 1 FROM "Instances" WHERE "Name" = $1)"#,
                &[&name],
            )
            .await
            .map_err(|e| StoreError::query("instance name lookup", e))?;

        Ok(row.get(0))
    }

    pub async fn set_dial(&self, instance_id: &str, dial_id: &str, dial: &Dial) -> Result<()> {
        let mut client = self.manager.client().await?;
        let tx = client.transaction().await?;

        insert_dial(&tx, instance_id, dial_id, dial).await?;

        tx.commit().await?;
        debug!("Stored dial {} on instance {}", dial_id, instance_id);
        Ok(())
    }

    /// Dial with its plan, plus the guid of the owning instance.
    pub async fn get_dial(&self, dial_id: &str) -> Result<(Dial, String)> {
        let client = self.manager.client().await?;

        let row = client
            .query_opt(
                r#"SELECT d."Configuration", d."Instances_Guid", p."Guid", p."Name", p."Description", p."Free", p."Metadata"
                   FROM "Dials" d
                   JOIN "Plans" p ON p."Guid" = d."Plans_Guid"
                   WHERE d."Guid" = $1"#,
                &[&dial_id],
            )
            .await
            .map_err(|e| StoreError::query(format!("get dial {}", dial_id), e))?
            .ok_or_else(|| StoreError::not_found("Dial", dial_id))?;

        let configuration = decode_json(row.get(0))?;
        let instance_id: String = row.get(1);
        let plan = plan_from_row(&row, 2)?;

        Ok((Dial { plan, configuration }, instance_id))
    }

    /// Remove a dial and the plan it carries.
    pub async fn delete_dial(&self, dial_id: &str) -> Result<()> {
        let mut client = self.manager.client().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                r#"DELETE FROM "Dials" WHERE "Guid" = $1 RETURNING "Plans_Guid""#,
                &[&dial_id],
            )
            .await
            .map_err(|e| StoreError::query(format!("delete dial {}", dial_id), e))?
            .ok_or_else(|| StoreError::not_found("Dial", dial_id))?;

        let plan_id: String = row.get(0);
        tx.execute(r#"DELETE FROM "Plans" WHERE "Guid" = $1"#, &[&plan_id])
            .await
            .map_err(|e| StoreError::query(format!("delete plan {}", plan_id), e))?;

        tx.commit().await?;
        debug!("Deleted dial {} and plan {}", dial_id, plan_id);
        Ok(())
    }

    /// Plan plus the guids of the dial and instance it belongs to.
    pub async fn get_plan(&self, plan_id: &str) -> Result<(Plan, String, String)> {
        let client = self.manager.client().await?;

        let row = client
            .query_opt(
                &format!("SELECT {} FROM \"Plans\" WHERE \"Guid\" = $1", PLAN_COLUMNS),
                &[&plan_id],
            )
            .await
            .map_err(|e| StoreError::query(format!("get plan {}", plan_id), e))?
            .ok_or_else(|| StoreError::not_found("Plan", plan_id))?;

        let plan = plan_from_row(&row, 0)?;

        let owner = client
            .query_opt(
                r#"SELECT "Guid", "Instances_Guid" FROM "Dials" WHERE "Plans_Guid" = $1 LIMIT 1"#,
                &[&plan_id],
            )
            .await
            .map_err(|e| StoreError::query(format!("get dial of plan {}", plan_id), e))?
            .ok_or_else(|| StoreError::not_found("Dial for plan", plan_id))?;

        Ok((plan, owner.get(0), owner.get(1)))
    }

    pub async fn set_service(&self, instance_id: &str, service: &CatalogService) -> Result<()> {
        let mut client = self.manager.client().await?;
        let tx = client.transaction().await?;

        insert_service(&tx, instance_id, service).await?;

        tx.commit().await?;
        debug!("Stored service {} on instance {}", service.id, instance_id);
        Ok(())
    }

    /// Service plus the guid of the instance it belongs to.
    pub async fn get_service(&self, service_id: &str) -> Result<(CatalogService, String)> {
        let client = self.manager.client().await?;

        let row = client
            .query_opt(
                &format!("SELECT {} FROM \"Services\" WHERE \"Guid\" = $1", SERVICE_COLUMNS),
                &[&service_id],
            )
            .await
            .map_err(|e| StoreError::query(format!("get service {}", service_id), e))?
            .ok_or_else(|| StoreError::not_found("Service", service_id))?;

        let instance_id: String = row.get(8);
        Ok((service_from_row(&row)?, instance_id))
    }

    /// Remove the service registered for an instance.
    pub async fn delete_service(&self, instance_id: &str) -> Result<()> {
        let client = self.manager.client().await?;

        let removed = client
            .execute(
                r#"DELETE FROM "Services" WHERE "Instances_Guid" = $1"#,
                &[&instance_id],
            )
            .await
            .map_err(|e| StoreError::query(format!("delete service of {}", instance_id), e))?;

        if removed == 0 {
            return Err(StoreError::not_found("Service for instance", instance_id));
        }
        Ok(())
    }
}

pub(super) async fn insert_instance(
    tx: &Transaction<'_>,
    instance_id: &str,
    instance: &Instance,
) -> Result<()> {
    let ca_cert = instance.ca_cert.as_ref().map(|c| c.as_bytes().to_vec());
    tx.execute(
        &format!("INSERT INTO \"Instances\" ({}) VALUES ($1, $2, $3, $4, $5, $6)", INSTANCE_COLUMNS),
        &[
            &instance_id,
            &instance.name,
            &instance.target_url,
            &instance.authentication_key,
            &ca_cert,
            &instance.skip_ssl,
        ],
    )
    .await
    .map_err(|e| StoreError::query(format!("insert instance {}", instance_id), e))?;

    for (dial_id, dial) in &instance.dials {
        insert_dial(tx, instance_id, dial_id, dial).await?;
    }

    if let Some(service) = instance.service.as_ref().filter(|s| !s.name.is_empty()) {
        insert_service(tx, instance_id, service).await?;
    }

    Ok(())
}

/// Delete an instance and everything hanging off it. Returns the number of
/// instance rows removed and of dials removed with their plans.
pub(super) async fn remove_instance(tx: &Transaction<'_>, instance_id: &str) -> Result<(u64, usize)> {
    let plan_ids: Vec<String> = tx
        .query(
            r#"DELETE FROM "Dials" WHERE "Instances_Guid" = $1 RETURNING "Plans_Guid""#,
            &[&instance_id],
        )
        .await
        .map_err(|e| StoreError::query(format!("delete dials of {}", instance_id), e))?
        .iter()
        .map(|row| row.get(0))
        .collect();

    if !plan_ids.is_empty() {
        tx.execute(r#"DELETE FROM "Plans" WHERE "Guid" = ANY($1)"#, &[&plan_ids])
            .await
            .map_err(|e| StoreError::query(format!("delete plans of {}", instance_id), e))?;
    }

    tx.execute(
        r#"DELETE FROM "Services" WHERE "Instances_Guid" = $1"#,
        &[&instance_id],
    )
    .await
    .map_err(|e| StoreError::query(format!("delete services of {}", instance_id), e))?;

    let removed = tx
        .execute(r#"DELETE FROM "Instances" WHERE "Guid" = $1"#, &[&instance_id])
        .await
        .map_err(|e| StoreError::query(format!("delete instance {}", instance_id), e))?;

    Ok((removed, plan_ids.len()))
}

async fn fetch_instance_row(client: &Client, instance_id: &str) -> Result<Instance> {
    let row = client
        .query_opt(
            &format!("SELECT {} FROM \"Instances\" WHERE \"Guid\" = $1", INSTANCE_COLUMNS),
            &[&instance_id],
        )
        .await
        .map_err(|e| StoreError::query(format!("get instance {}", instance_id), e))?
        .ok_or_else(|| StoreError::not_found("Instance", instance_id))?;

    instance_from_row(&row)
}

async fn insert_dial(tx: &Transaction<'_>, instance_id: &str, dial_id: &str, dial: &Dial) -> Result<()> {
    let plan = &dial.plan;
    let metadata = plan.metadata.as_ref().map(encode_json).transpose()?;
    let configuration = dial.configuration.as_ref().map(encode_json).transpose()?;

    tx.execute(
        &format!("INSERT INTO \"Plans\" ({}) VALUES ($1, $2, $3, $4, $5)", PLAN_COLUMNS),
        &[&plan.id, &plan.name, &plan.description, &plan.free, &metadata],
    )
    .await
    .map_err(|e| StoreError::query(format!("insert plan {}", plan.id), e))?;

    tx.execute(
        r#"INSERT INTO "Dials" ("Guid", "Configuration", "Plans_Guid", "Instances_Guid") VALUES ($1, $2, $3, $4)"#,
        &[&dial_id, &configuration, &plan.id, &instance_id],
    )
    .await
    .map_err(|e| StoreError::query(format!("insert dial {}", dial_id), e))?;

    Ok(())
}

async fn insert_service(tx: &Transaction<'_>, instance_id: &str, service: &CatalogService) -> Result<()> {
    let dashboard = service.dashboard_client.as_ref().map(encode_json).transpose()?;
    let metadata = service.metadata.as_ref().map(encode_json).transpose()?;
    let tags = encode_json(&service.tags)?;
    let requires = encode_json(&service.requires)?;

    tx.execute(
        &format!(
            "INSERT INTO \"Services\" ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            SERVICE_COLUMNS
        ),
        &[
            &service.id,
            &service.bindable,
            &dashboard,
            &service.description,
            &metadata,
            &service.name,
            &service.plan_updateable,
            &tags,
            &instance_id,
            &requires,
        ],
    )
    .await
    .map_err(|e| StoreError::query(format!("insert service {}", service.id), e))?;

    Ok(())
}

fn instance_from_row(row: &Row) -> Result<Instance> {
    let ca_cert: Option<Vec<u8>> = row.get(4);
    let ca_cert = ca_cert
        .filter(|bytes| !bytes.is_empty())
        .map(String::from_utf8)
        .transpose()
        .map_err(|e| StoreError::Serialization(format!("CaCert is not UTF-8: {}", e)))?;

    Ok(Instance {
        name: row.get::<_, Option<String>>(1).unwrap_or_default(),
        target_url: row.get::<_, Option<String>>(2).unwrap_or_default(),
        authentication_key: row.get::<_, Option<String>>(3).unwrap_or_default(),
        ca_cert,
        skip_ssl: row.get::<_, Option<bool>>(5).unwrap_or(false),
        dials: BTreeMap::new(),
        service: None,
    })
}

/// Plan columns starting at `offset`, in `PLAN_COLUMNS` order.
fn plan_from_row(row: &Row, offset: usize) -> Result<Plan> {
    Ok(Plan {
        id: row.get(offset),
        name: row.get::<_, Option<String>>(offset + 1).unwrap_or_default(),
        description: row.get::<_, Option<String>>(offset + 2).unwrap_or_default(),
        free: row.get::<_, Option<bool>>(offset + 3).unwrap_or(false),
        metadata: decode_json(row.get(offset + 4))?,
    })
}

fn service_from_row(row: &Row) -> Result<CatalogService> {
    Ok(CatalogService {
        id: row.get(0),
        bindable: row.get::<_, Option<bool>>(1).unwrap_or(false),
        dashboard_client: decode_json(row.get(2))?,
        description: row.get::<_, Option<String>>(3).unwrap_or_default(),
        metadata: decode_json(row.get(4))?,
        name: row.get::<_, Option<String>>(5).unwrap_or_default(),
        plan_updateable: row.get::<_, Option<bool>>(6).unwrap_or(false),
        tags: decode_json(row.get(7))?.unwrap_or_default(),
        requires: decode_json(row.get(9))?.unwrap_or_default(),
    })
}
