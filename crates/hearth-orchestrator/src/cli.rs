//! Operator CLI surface: user and agent-token management.
//! Exit codes are `0` on success, `1` on invalid args or failure. Secrets
//! (a token's plaintext, a new user's nothing — passwords are supplied by
//! the operator, never generated) are printed exactly once to stdout and
//! never logged.

use comfy_table::{Cell, Table};
use uuid::Uuid;

use crate::core::Core;

/// Top-level CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Create an operator account.
    CreateUser {
        /// Login name.
        name: String,
        /// Plaintext password; bcrypt-hashed before storage.
        password: String,
        /// `admin` or `viewer`; defaults to `viewer`.
        #[arg(default_value = "viewer")]
        role: String,
    },
    /// Mint a bearer token for a server's agent.
    CreateAgentToken {
        /// Id of the server the token authenticates.
        server_id: Uuid,
    },
    /// List every minted agent token (never shows plaintext).
    ListAgentTokens,
    /// Revoke an agent token by id.
    RevokeAgentToken {
        /// The token's id, from `list-agent-tokens`.
        id: Uuid,
    },
    /// List every operator account.
    ListUsers,
}

/// Run one subcommand against an assembled [`Core`]. Returns the process
/// exit code (`0` success, `1` failure).
pub fn run(core: &Core, command: Command) -> i32 {
    let result = match command {
        Command::CreateUser { name, password, role } => create_user(core, &name, &password, &role),
        Command::CreateAgentToken { server_id } => create_agent_token(core, server_id),
        Command::ListAgentTokens => list_agent_tokens(core),
        Command::RevokeAgentToken { id } => revoke_agent_token(core, id),
        Command::ListUsers => list_users(core),
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

fn create_user(core: &Core, name: &str, password: &str, role: &str) -> anyhow::Result<()> {
    let role: hearth_proto::UserRole = role.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let user = core.users.create(name, password, role)?;
    println!("created user '{}' ({})", user.username, user.id);
    Ok(())
}

fn create_agent_token(core: &Core, server_id: Uuid) -> anyhow::Result<()> {
    if core.registry.get_server(server_id)?.is_none() {
        anyhow::bail!("no server with id {server_id}");
    }
    let (token, plaintext) = core.tokens.create(server_id)?;
    println!("token id: {}", token.id);
    println!("{plaintext}");
    Ok(())
}

fn list_agent_tokens(core: &Core) -> anyhow::Result<()> {
    let mut table = Table::new();
    table.set_header(vec!["ID", "SERVER", "CREATED", "STATUS"]);
    for token in core.tokens.list()? {
        let status = if token.is_active() { "active" } else { "revoked" };
        table.add_row(vec![
            Cell::new(token.id),
            Cell::new(token.server_id),
            Cell::new(token.created_at.to_rfc3339()),
            Cell::new(status),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn revoke_agent_token(core: &Core, id: Uuid) -> anyhow::Result<()> {
    core.tokens.revoke(id)?;
    println!("revoked token {id}");
    Ok(())
}

fn list_users(core: &Core) -> anyhow::Result<()> {
    let mut table = Table::new();
    table.set_header(vec!["USERNAME", "ROLE", "CREATED"]);
    for user in core.users.list()? {
        table.add_row(vec![
            Cell::new(user.username),
            Cell::new(format!("{:?}", user.role)),
            Cell::new(user.created_at.to_rfc3339()),
        ]);
    }
    println!("{table}");
    Ok(())
}
