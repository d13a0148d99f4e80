//! CLI contact subcommands.

use anyhow::{Context, Result, anyhow, bail};
use clap::Subcommand;
use console::style;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::cli::output::{print_json, short_time};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ContactCommand {
    /// Set contact attributes (merged into existing ones).
    Set {
        /// Contact UUID.
        id: Uuid,

        /// `key=value` pairs. Values are parsed as JSON, falling back to a string.
        #[arg(required = true)]
        pairs: Vec<String>,

        /// Organization the contact belongs to (used on first insert only).
        #[arg(long, default_value_t = Uuid::nil())]
        org: Uuid,
    },

    /// Show a contact's attributes.
    Show {
        /// Contact UUID.
        id: Uuid,
    },
}

pub async fn handle_contact_command(cmd: ContactCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        ContactCommand::Set { id, pairs, org } => {
            let attributes = parse_pairs(&pairs)?;
            state
                .contacts
                .upsert_contact(&id, &org, &attributes)
                .await
                .context("Failed to save contact")?;
            if json {
                return print_json(&serde_json::json!({ "id": id, "updated": attributes }));
            }
            println!();
            println!(
                "  {} Contact {} updated ({} field(s))",
                style("*").green().bold(),
                id,
                attributes.len()
            );
            println!();
            Ok(())
        }
        ContactCommand::Show { id } => {
            let contact = state
                .contacts
                .get_contact(&id)
                .await
                .context("Failed to look up contact")?
                .ok_or_else(|| anyhow!("Contact {id} not found"))?;
            if json {
                return print_json(&contact);
            }
            println!();
            println!("  Contact {}", style(contact.id).cyan().bold());
            println!("  Organization: {}", contact.organization_id);
            println!("  Updated:      {}", short_time(&contact.updated_at));
            for (key, value) in &contact.attributes {
                println!("    {key} = {value}");
            }
            println!();
            Ok(())
        }
    }
}

/// Parse `key=value` arguments into an attribute map.
fn parse_pairs(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Expected key=value, got '{pair}'");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Empty attribute name in '{pair}'");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        out.insert(key.to_string(), value);
    }
    Ok(out)
}
