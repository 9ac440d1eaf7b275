//! Endpoint discovery from a MultiChain data directory.
//!
//! `<datadir>/multichain.conf` holds the RPC credentials (`rpcuser`,
//! `rpcpassword`) and optionally `rpcport` / `rpchost`; the chain's
//! `<datadir>/params.dat` supplies `default-rpc-port` when the conf file
//! does not override it.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use mcgate_core::endpoint::{ChainEndpoint, Credentials, Scheme};

use crate::error::ExplorerError;

const CONF_FILE: &str = "multichain.conf";
const PARAMS_FILE: &str = "params.dat";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_USER: &str = "multichainrpc";

/// Parse `key = value` lines, ignoring blank lines and `#` comments.
pub fn parse_key_values(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or_default().trim();
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Build the RPC endpoint of the chain stored in `dir`.
pub fn endpoint_from_datadir(dir: &Path) -> Result<ChainEndpoint, ExplorerError> {
    let conf_path = dir.join(CONF_FILE);
    let conf = fs::read_to_string(&conf_path).map_err(|e| {
        ExplorerError::Config(format!("cannot read {}: {e}", conf_path.display()))
    })?;
    let conf = parse_key_values(&conf);

    // params.dat is optional as long as multichain.conf names the port.
    let params = fs::read_to_string(dir.join(PARAMS_FILE))
        .map(|text| parse_key_values(&text))
        .unwrap_or_default();

    let password = conf.get("rpcpassword").ok_or_else(|| {
        ExplorerError::Config(format!("{} has no rpcpassword", conf_path.display()))
    })?;
    let user = conf
        .get("rpcuser")
        .map(String::as_str)
        .unwrap_or(DEFAULT_USER);

    let port_text = conf
        .get("rpcport")
        .or_else(|| params.get("default-rpc-port"))
        .ok_or_else(|| {
            ExplorerError::Config(format!(
                "no rpcport in {CONF_FILE} and no default-rpc-port in {PARAMS_FILE} under {}",
                dir.display()
            ))
        })?;
    let port: u16 = port_text
        .parse()
        .map_err(|_| ExplorerError::Config(format!("invalid RPC port {port_text:?}")))?;

    let host = conf
        .get("rpchost")
        .map(String::as_str)
        .unwrap_or(DEFAULT_HOST);
    let scheme = match conf.get("rpcssl").map(String::as_str) {
        Some("1") | Some("true") => Scheme::Https,
        _ => Scheme::Http,
    };

    tracing::debug!(datadir = %dir.display(), host, port, "endpoint loaded from data directory");
    Ok(ChainEndpoint::new(
        scheme,
        host,
        port,
        Some(Credentials::new(user, password.as_str())),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: &str = "\
# ==== MultiChain configuration file ====
chain-name = chain1                # Chain name, used as first argument for multichaind.
default-network-port = 8571        # Default TCP/IP port for peer-to-peer connection.
default-rpc-port = 8570            # Default TCP/IP port for incoming JSON-RPC API requests.
";

    fn datadir(conf: &str, params: Option<&str>) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONF_FILE), conf).unwrap();
        if let Some(params) = params {
            fs::write(dir.path().join(PARAMS_FILE), params).unwrap();
        }
        dir
    }

    #[test]
    fn parses_params_with_trailing_comments() {
        let kv = parse_key_values(PARAMS);
        assert_eq!(kv["chain-name"], "chain1");
        assert_eq!(kv["default-rpc-port"], "8570");
        assert!(!kv.contains_key("# ==== MultiChain configuration file ===="));
    }

    #[test]
    fn port_falls_back_to_params() {
        let dir = datadir("rpcuser=multichainrpc\nrpcpassword=s3cret\n", Some(PARAMS));
        let ep = endpoint_from_datadir(dir.path()).unwrap();
        assert_eq!(ep.url(), "http://127.0.0.1:8570");
        let creds = ep.credentials().unwrap();
        assert_eq!(creds.user(), "multichainrpc");
        assert_eq!(creds.password(), "s3cret");
    }

    #[test]
    fn conf_overrides_port_and_host() {
        let dir = datadir(
            "rpcpassword=pw\nrpcport=9000\nrpchost=10.0.0.5\nrpcssl=1\n",
            Some(PARAMS),
        );
        let ep = endpoint_from_datadir(dir.path()).unwrap();
        assert_eq!(ep.url(), "https://10.0.0.5:9000");
        assert_eq!(ep.credentials().unwrap().user(), DEFAULT_USER);
    }

    #[test]
    fn missing_password_or_port_is_config_error() {
        let dir = datadir("rpcuser=u\n", Some(PARAMS));
        assert!(matches!(endpoint_from_datadir(dir.path()), Err(ExplorerError::Config(_))));

        let dir = datadir("rpcpassword=pw\n", None);
        let err = endpoint_from_datadir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("default-rpc-port"));
    }

    #[test]
    fn missing_directory_is_config_error() {
        let err = endpoint_from_datadir(Path::new("/nonexistent/mcgate/chain")).unwrap_err();
        assert!(matches!(err, ExplorerError::Config(_)));
    }
}
