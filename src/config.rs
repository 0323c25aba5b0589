use ipnetwork::IpNetwork;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_schema: String,
    pub api_host: String,
    pub api_port: u16,
    pub max_connections: u32,
    pub migrations_dir: Option<PathBuf>,
    pub seed_file: Option<PathBuf>,
    pub admin_token: Option<String>,
    pub allowed_admin_ips: Vec<IpNetwork>,
    pub trusted_proxies: Vec<IpNetwork>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // DATABASE_URL wins over the individual DB_* fields
        let database_url = if let Ok(url) = env::var("DATABASE_URL") {
            url
        } else {
            let db_host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
            let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
            let db_name = env::var("DB_NAME").unwrap_or_else(|_| "usb".to_string());
            let db_user = env::var("DB_USER").unwrap_or_else(|_| "usb".to_string());
            let db_password = env::var("DB_PASSWORD").unwrap_or_else(|_| "password".to_string());

            build_database_url(&db_user, &db_password, &db_host, &db_port, &db_name)
        };

        let db_schema = env::var("DB_SCHEMA").unwrap_or_else(|_| "usb".to_string());
        if !is_valid_identifier(&db_schema) {
            anyhow::bail!("Invalid DB_SCHEMA: {}", db_schema);
        }

        let api_host = env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let api_port = env::var("API_PORT")
            .unwrap_or_else(|_| "9050".to_string())
            .parse()
            .unwrap_or(9050);

        let max_connections = env::var("MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let migrations_dir = env::var("MIGRATIONS_DIR").ok().map(PathBuf::from);
        let seed_file = env::var("SEED_FILE").ok().map(PathBuf::from);

        let admin_token = env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty());

        let allowed_admin_ips = parse_networks(
            &env::var("ALLOWED_ADMIN_IPS").unwrap_or_else(|_| "127.0.0.0/8,::1/128".to_string()),
        );

        // Forwarding headers are only read from these peers
        let trusted_proxies = parse_networks(&env::var("TRUSTED_PROXIES").unwrap_or_default());

        Ok(Config {
            database_url,
            db_schema,
            api_host,
            api_port,
            max_connections,
            migrations_dir,
            seed_file,
            admin_token,
            allowed_admin_ips,
            trusted_proxies,
        })
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.api_host, self.api_port);
        addr.parse().map_err(|e| anyhow::anyhow!("Invalid socket address: {}", e))
    }
}

fn build_database_url(user: &str, password: &str, host: &str, port: &str, name: &str) -> String {
    // Passwords may carry '@', ':' or '/'
    let encoded_password = urlencoding::encode(password);
    format!("postgres://{}:{}@{}:{}/{}", user, encoded_password, host, port, name)
}

/// Parse a comma separated list of CIDR blocks, dropping blanks and garbage.
pub fn parse_networks(list: &str) -> Vec<IpNetwork> {
    list.split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                IpNetwork::from_str(trimmed).ok()
            }
        })
        .collect()
}

/// Lowercase PostgreSQL identifier check used for schema names.
pub fn is_valid_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > 63 {
        return false;
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
