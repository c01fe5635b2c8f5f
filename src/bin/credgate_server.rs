//!
//! credgate server binary
//! ----------------------
//! Command-line entry point for the credential resolution service. Key
//! material and the remote authority come from environment variables; the
//! HTTP port can be set via flag or environment.

use anyhow::Result;
use std::env;
use std::sync::Arc;

use credgate::cache::SessionCache;
use credgate::config::AuthConfig;
use credgate::resolver::AuthResolver;
use credgate::server::{run_with_port, AppState};
use credgate::verifier::{
    ExternalVerifier, InMemoryProfileDirectory, InMemorySessionStore, JwtIdentityProvider,
    LookupVerifier, RemoteAuthority, SignedVerifier, VerifierSet,
};

fn parse_port_env(name: &str) -> Option<u16> {
    match env::var(name) {
        Ok(val) => val.parse::<u16>().ok(),
        Err(_) => None,
    }
}

fn parse_port_arg(args: &[String], flag: &str) -> Option<u16> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return args[i + 1].parse::<u16>().ok();
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber with env filter if provided
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let args: Vec<String> = env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("credgate Server\n\nUSAGE:\n  credgate_server [--http-port N]\n\nOPTIONS:\n  --http-port N   HTTP API port (env: CREDGATE_HTTP_PORT, default 7878)\n\nENVIRONMENT:\n  CREDGATE_ISSUER             expected issuer on signed delegated tokens\n  CREDGATE_SIGNING_KEY        base64 HS256 secret\n  CREDGATE_SEALING_KEY        base64 32-byte AEAD key\n  CREDGATE_COOKIE_KEY         base64 cookie MAC key\n  CREDGATE_AUTHORITY_URL      remote authority base URL\n  CREDGATE_AUTHORITY_API_KEY  service API key for authority verify calls\n  CREDGATE_IDP_ISSUER         third-party identity provider issuer\n  CREDGATE_IDP_KEY            base64 identity provider HS256 secret\n");
        return Ok(());
    }

    let http_port = parse_port_arg(&args, "--http-port")
        .or_else(|| parse_port_env("CREDGATE_HTTP_PORT"))
        .unwrap_or(7878);

    let cfg = AuthConfig::from_env()?;

    // Identity provider wiring: defaults to the service issuer/secret when
    // the dedicated variables are unset.
    let idp_issuer = env::var("CREDGATE_IDP_ISSUER").unwrap_or_else(|_| cfg.issuer.clone());
    let idp_key = match env::var("CREDGATE_IDP_KEY") {
        Ok(b64) => {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.decode(b64)?
        }
        Err(_) => cfg.signing_key.clone(),
    };

    let verifiers = VerifierSet {
        signed: SignedVerifier::new(cfg.issuer.clone(), &cfg.signing_key, cfg.sealing_key),
        external: ExternalVerifier::new(
            Arc::new(JwtIdentityProvider::hs256(idp_issuer, &idp_key)),
            Arc::new(InMemoryProfileDirectory::new()),
        ),
        lookup: LookupVerifier::new(cfg.cookie_key.clone(), Arc::new(InMemorySessionStore::new())),
        authority: RemoteAuthority::new(&cfg)?,
    };
    let resolver = AuthResolver::new(SessionCache::new(cfg.cache_capacity), verifiers);

    run_with_port(http_port, AppState { resolver: Arc::new(resolver) }).await
}
