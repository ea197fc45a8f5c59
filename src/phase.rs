//! Startup and authentication (§6): the exchange that runs once per
//! connection before any query can be sent.
use std::borrow::Cow;

use crate::{
    auth::{encode_md5_password, ScramClient},
    config::{Config, SslMode, StartupFields},
    error::{Error, Result},
    executor::Executor,
    message::{backend, frontend, UnsupportedAuth},
    transaction::Transaction,
    transport::{PgTransport, PgTransportExt},
};

/// Config for the postgres startup phase.
///
/// <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>
pub struct StartupConfig<'a> {
    pub(crate) user: Cow<'a, str>,
    pub(crate) database: Option<Cow<'a, str>>,
    pub(crate) password: Option<Cow<'a, str>>,
    pub(crate) application_name: Option<Cow<'a, str>>,
}

impl<'a> From<&'a Config> for StartupConfig<'a> {
    fn from(cfg: &'a Config) -> Self {
        let StartupFields { user, database, application_name } = StartupFields::from(cfg);
        StartupConfig {
            user,
            database: Some(database),
            password: if cfg.pass.is_empty() { None } else { Some(cfg.pass.as_str().into()) },
            application_name,
        }
    }
}

/// Startup phase successful response.
pub struct StartupResponse {
    /// Secret-key data the frontend must save to issue cancel requests later.
    pub backend_key_data: backend::BackendKeyData,
}

/// Perform the startup message and the authentication exchange that follows it.
///
/// <https://www.postgresql.org/docs/17/protocol-flow.html#PROTOCOL-FLOW-START-UP>
pub async fn startup<'a, IO: PgTransport>(
    opt: impl Into<StartupConfig<'a>>,
    mut io: IO,
) -> Result<StartupResponse> {
    let opt: StartupConfig = opt.into();

    io.send_startup(frontend::Startup {
        user: &opt.user,
        database: opt.database.as_deref(),
        application_name: opt.application_name.as_deref(),
        replication: None,
    });
    io.flush().await?;

    loop {
        use backend::Authentication::*;
        match io.recv().await? {
            Ok => break,
            CleartextPassword => {
                let password = opt.password.as_deref().unwrap_or_default();
                io.send(frontend::PasswordMessage { password });
                io.flush().await?;
            }
            Md5Password { salt } => {
                let password = opt.password.as_deref().unwrap_or_default();
                let encoded = encode_md5_password(&opt.user, password, salt);
                io.send(frontend::PasswordMessage { password: &encoded });
                io.flush().await?;
            }
            SaslMechanisms(mechanisms) => {
                if !mechanisms.iter().any(|m| m == "SCRAM-SHA-256") {
                    return Err(UnsupportedAuth.into());
                }
                let password = opt.password.as_deref().unwrap_or_default();
                let mut scram = ScramClient::new(password);
                let first = scram.client_first();
                io.send(frontend::SaslInitialResponse { mechanism: "SCRAM-SHA-256", data: &first });
                io.flush().await?;

                let server_first = match io.recv().await? {
                    SaslContinue(data) => data,
                    _ => return Err(Error::connection_failed("expected SASLContinue")),
                };
                let client_final = scram.process_server_first(&server_first)?;
                io.send(frontend::SaslResponse { data: &client_final });
                io.flush().await?;

                let server_final = match io.recv().await? {
                    SaslFinal(data) => data,
                    _ => return Err(Error::connection_failed("expected SASLFinal")),
                };
                scram.verify_server_final(&server_final)?;

                // Server still owes us the trailing AuthenticationOk.
                match io.recv().await? {
                    Ok => {}
                    _ => return Err(Error::connection_failed("expected AuthenticationOk after SASL")),
                }
                break;
            }
            SaslContinue(_) | SaslFinal(_) => return Err(UnsupportedAuth.into()),
        }
    }

    // After AuthenticationOk: ParameterStatus is eaten internally by the
    // transport, so only BackendKeyData and the terminal ReadyForQuery matter here.
    let mut key_data = None;
    loop {
        use crate::message::backend::BackendMessage::*;
        match io.recv().await? {
            ReadyForQuery(_) => break,
            BackendKeyData(new_key_data) => key_data = Some(new_key_data),
            f => return Err(f.unexpected("startup phase")),
        }
    }

    Ok(StartupResponse {
        backend_key_data: key_data.ok_or_else(|| Error::connection_failed("server never sent BackendKeyData"))?,
    })
}

/// `SSLRequest` negotiation result, read directly off the raw socket before
/// any [`PgTransport`] wraps it: the server's one-byte reply ('S'/'N') has no
/// frame header and so falls outside the regular message codec.
pub enum SslNegotiation {
    Accepted,
    Declined,
}

impl SslNegotiation {
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            b'S' => Ok(Self::Accepted),
            b'N' => Ok(Self::Declined),
            _ => Err(Error::connection_failed("server sent an invalid SSLRequest reply")),
        }
    }
}

/// Whether an `SslMode` requires the client to abort when the server declines TLS.
pub fn ssl_required(mode: SslMode) -> bool {
    matches!(mode, SslMode::Require)
}

/// Begin a transaction against `exec` with the default isolation level
/// (read committed) and read/write access.
pub async fn begin<Exec: Executor>(exec: Exec) -> Result<Transaction<Exec::Transport>> {
    begin_with(exec, crate::transaction::IsolationLevel::default(), false).await
}

/// Begin a transaction against `exec` with an explicit isolation level and
/// readonly flag (§4.6).
pub async fn begin_with<Exec: Executor>(
    exec: Exec,
    isolation: crate::transaction::IsolationLevel,
    readonly: bool,
) -> Result<Transaction<Exec::Transport>> {
    let io = exec.connection().await?;
    Transaction::begin_with(io, isolation, readonly).await
}
