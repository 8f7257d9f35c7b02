use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{Actor, Role};
use crate::cli::OutputFormat;
use crate::collaborators::TracingAuditSink;
use crate::config;
use crate::database::{DatabaseManager, PgFeeStore};
use crate::fees::FeeHeads;
use crate::services::FeeStructureService;

#[derive(Args, Debug)]
pub struct SeedArgs {
    #[arg(help = "YAML fixture with fee structures")]
    pub file: PathBuf,
}

/// ```yaml
/// school_id: 6f0c...
/// structures:
///   - class_id: 1b2e...
///     fee_head: { admissionFee: 5000, firstTermAmt: 3000 }
/// ```
#[derive(Debug, Deserialize)]
pub struct SeedFile {
    pub school_id: Uuid,
    #[serde(default)]
    pub structures: Vec<SeedStructure>,
}

#[derive(Debug, Deserialize)]
pub struct SeedStructure {
    pub class_id: Uuid,
    pub fee_head: FeeHeads,
}

pub fn load_seed_file(path: &Path) -> anyhow::Result<SeedFile> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("{} is not a valid seed file", path.display()))
}

pub async fn handle(args: SeedArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let seed = load_seed_file(&args.file)?;

    let pool = DatabaseManager::connect(&config::config().database).await?;
    DatabaseManager::migrate(&pool).await?;
    let service = FeeStructureService::new(Arc::new(PgFeeStore::new(pool)), Arc::new(TracingAuditSink));
    let actor = Actor {
        user_id: Uuid::nil(),
        school_id: seed.school_id,
        role: Role::Admin,
    };

    let mut saved = Vec::with_capacity(seed.structures.len());
    for structure in seed.structures {
        let stored = service
            .set_fee_structure(&actor, structure.class_id, structure.fee_head)
            .await
            .with_context(|| format!("class {}", structure.class_id))?;
        saved.push(stored);
    }

    match output_format {
        OutputFormat::Json => println!("{}", json!({ "success": true, "data": saved })),
        OutputFormat::Text => {
            for s in &saved {
                println!("{}  total {}", s.class_id, s.total_amount);
            }
            println!("Seeded {} fee structure(s)", saved.len());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::io::Write;

    #[test]
    fn parses_yaml_fixture() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "school_id: 00000000-0000-0000-0000-000000000001\n\
             structures:\n  \
               - class_id: 00000000-0000-0000-0000-000000000002\n    \
                 fee_head: {{ admissionFee: 5000, firstTermAmt: 3000 }}"
        )
        .unwrap();

        let seed = load_seed_file(file.path()).unwrap();
        assert_eq!(seed.structures.len(), 1);
        assert_eq!(seed.structures[0].fee_head.total(), Decimal::from(8000));
    }
}
