//! Test helpers: a scripted `sh` responder standing in for a tool-host.
//!
//! The responder reads JSON-RPC request lines, extracts the request id
//! with `sed`, and answers from a case table. It always knows how to
//! answer `initialize`; tests add the cases they need.

use crate::client::{McpClient, McpError};
use std::time::Duration;

const INIT_CASE: &str = r#"*'"initialize"'*) printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","serverInfo":{"name":"fake-host","version":"0.0.1"}}}\n' "$id" ;;"#;

pub(crate) fn responder(extra_cases: &str) -> String {
    format!(
        r#"while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    {INIT_CASE}
    {extra_cases}
  esac
done"#
    )
}

pub(crate) async fn script_client(
    script: &str,
    timeout: Duration,
) -> Result<McpClient, McpError> {
    McpClient::spawn("sh", &["-c".to_string(), script.to_string()], timeout).await
}
