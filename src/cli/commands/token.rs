use clap::Args;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{generate_jwt, Claims, Role};
use crate::cli::OutputFormat;

#[derive(Args, Debug)]
pub struct TokenArgs {
    #[arg(long, help = "School the token is scoped to")]
    pub school: Uuid,

    #[arg(long, help = "User id (random when omitted)")]
    pub user: Option<Uuid>,

    #[arg(long, default_value = "admin", help = "admin, accountant, teacher or staff")]
    pub role: Role,
}

pub fn handle(args: TokenArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let user = args.user.unwrap_or_else(Uuid::new_v4);
    let claims = Claims::new(user, args.school, args.role);
    let token = generate_jwt(&claims)?;

    match output_format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "success": true,
                "data": {
                    "token": token,
                    "user_id": user,
                    "school_id": args.school,
                    "role": args.role,
                    "expires_at": claims.exp,
                }
            })
        ),
        OutputFormat::Text => println!("{}", token),
    }
    Ok(())
}
