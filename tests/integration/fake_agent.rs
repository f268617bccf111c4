//! A minimal agent-CLI stand-in for scenario tests that must drive a real
//! [`agent_relay::acp::AcpClient`] through the process pool without
//! depending on an actual agent binary being installed on the test host.
//!
//! Implemented as a POSIX shell script rather than a compiled fixture, run
//! under `/bin/sh -c`, so no extra build step or helper binary is needed.
//! Each script speaks just enough of the wire protocol for the scenario it
//! backs; everything not named below gets a generic empty `result`.

use std::path::Path;
use std::time::Duration;

use agent_relay::acp::spawner::SpawnConfig;

/// Build a `SpawnConfig` that runs `script` under `/bin/sh -c`.
pub fn config(workspace_root: &Path, script: &str) -> SpawnConfig {
    SpawnConfig {
        host_cli: "/bin/sh".to_owned(),
        host_cli_args: vec!["-c".to_owned(), script.to_owned()],
        workspace_root: workspace_root.to_path_buf(),
        agent_name: "default".to_owned(),
        startup_timeout: Duration::from_secs(5),
    }
}

/// Extracts `method` and `id` from an inbound JSON-RPC line with `sed`, then
/// dispatches on `method`. Shared preamble for every script below.
fn dispatch_preamble() -> &'static str {
    r#"
while IFS= read -r line; do
  method=$(printf '%s' "$line" | sed -n 's/.*"method":"\([^"]*\)".*/\1/p')
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
"#
}

/// Answers `session/new` with an incrementing `sid-N` and `session/prompt`
/// with two chunks (`"Hi "`, `"there"`) before ending the turn with
/// `stopReason: end_turn`. Used by the happy-path, chunk-loss, and
/// atomic-handoff scenarios, where every turn produces the same reply.
pub fn happy_path_script() -> String {
    format!(
        r#"sid_counter=0
{preamble}
  case "$method" in
    session/new)
      sid_counter=$((sid_counter + 1))
      [ -n "$id" ] && printf '{{"jsonrpc":"2.0","id":%s,"result":{{"sessionId":"sid-%s"}}}}\n' "$id" "$sid_counter"
      ;;
    session/prompt)
      printf '{{"jsonrpc":"2.0","method":"session/update","params":{{"sessionId":"sid-%s","update":{{"sessionUpdate":"agent_message_chunk","content":{{"type":"text","text":"Hi "}}}}}}}}\n' "$sid_counter"
      printf '{{"jsonrpc":"2.0","method":"session/update","params":{{"sessionId":"sid-%s","update":{{"sessionUpdate":"agent_message_chunk","content":{{"type":"text","text":"there"}}}}}}}}\n' "$sid_counter"
      [ -n "$id" ] && printf '{{"jsonrpc":"2.0","id":%s,"result":{{"stopReason":"end_turn"}}}}\n' "$id"
      ;;
    *)
      [ -n "$id" ] && printf '{{"jsonrpc":"2.0","id":%s,"result":{{}}}}\n' "$id"
      ;;
  esac
done
"#,
        preamble = dispatch_preamble()
    )
}

/// Same as [`happy_path_script`], but sleeps `delay_secs` before answering
/// `session/prompt` — long enough for a test to observe the slot as busy
/// and exercise contention against it.
pub fn happy_path_script_with_delay(delay_secs: u32) -> String {
    format!(
        r#"sid_counter=0
{preamble}
  case "$method" in
    session/new)
      sid_counter=$((sid_counter + 1))
      [ -n "$id" ] && printf '{{"jsonrpc":"2.0","id":%s,"result":{{"sessionId":"sid-%s"}}}}\n' "$id" "$sid_counter"
      ;;
    session/prompt)
      sleep {delay_secs}
      printf '{{"jsonrpc":"2.0","method":"session/update","params":{{"sessionId":"sid-%s","update":{{"sessionUpdate":"agent_message_chunk","content":{{"type":"text","text":"Hi "}}}}}}}}\n' "$sid_counter"
      printf '{{"jsonrpc":"2.0","method":"session/update","params":{{"sessionId":"sid-%s","update":{{"sessionUpdate":"agent_message_chunk","content":{{"type":"text","text":"there"}}}}}}}}\n' "$sid_counter"
      [ -n "$id" ] && printf '{{"jsonrpc":"2.0","id":%s,"result":{{"stopReason":"end_turn"}}}}\n' "$id"
      ;;
    *)
      [ -n "$id" ] && printf '{{"jsonrpc":"2.0","id":%s,"result":{{}}}}\n' "$id"
      ;;
  esac
done
"#,
        preamble = dispatch_preamble()
    )
}

/// Answers `session/new` with three chunks before `TurnEnd`, all emitted in
/// the same write as the prompt's response — the exact "reader enqueues
/// several notifications and fulfills the response in the same tick" shape
/// the chunk-loss regression scenario exercises.
pub fn three_chunk_script() -> String {
    format!(
        r#"{preamble}
  case "$method" in
    session/new)
      [ -n "$id" ] && printf '{{"jsonrpc":"2.0","id":%s,"result":{{"sessionId":"sid-A"}}}}\n' "$id"
      ;;
    session/prompt)
      printf '{{"jsonrpc":"2.0","method":"session/update","params":{{"sessionId":"sid-A","update":{{"sessionUpdate":"agent_message_chunk","content":{{"type":"text","text":"one "}}}}}}}}\n'
      printf '{{"jsonrpc":"2.0","method":"session/update","params":{{"sessionId":"sid-A","update":{{"sessionUpdate":"agent_message_chunk","content":{{"type":"text","text":"two "}}}}}}}}\n'
      printf '{{"jsonrpc":"2.0","method":"session/update","params":{{"sessionId":"sid-A","update":{{"sessionUpdate":"agent_message_chunk","content":{{"type":"text","text":"three"}}}}}}}}\n'
      [ -n "$id" ] && printf '{{"jsonrpc":"2.0","id":%s,"result":{{"stopReason":"end_turn"}}}}\n' "$id"
      ;;
    *)
      [ -n "$id" ] && printf '{{"jsonrpc":"2.0","id":%s,"result":{{}}}}\n' "$id"
      ;;
  esac
done
"#,
        preamble = dispatch_preamble()
    )
}

/// Rejects `session/load` with a stale-lock message naming a PID that is
/// guaranteed not to be running (a six-digit PID far past any real one),
/// and answers everything else with a generic result.
pub fn stale_lock_script() -> String {
    format!(
        r#"{preamble}
  case "$method" in
    session/load)
      [ -n "$id" ] && printf '{{"jsonrpc":"2.0","id":%s,"error":{{"code":-32000,"message":"Session is active in another process (PID 999999)"}}}}\n' "$id"
      ;;
    session/new)
      [ -n "$id" ] && printf '{{"jsonrpc":"2.0","id":%s,"result":{{"sessionId":"sid-recovered"}}}}\n' "$id"
      ;;
    *)
      [ -n "$id" ] && printf '{{"jsonrpc":"2.0","id":%s,"result":{{}}}}\n' "$id"
      ;;
  esac
done
"#,
        preamble = dispatch_preamble()
    )
}

/// Rejects `session/load` with a lock message naming *its own* PID (`$$`) —
/// a process that is, by construction, still alive for as long as the
/// script keeps running, i.e. the live-lock case.
pub fn live_lock_script() -> String {
    format!(
        r#"{preamble}
  case "$method" in
    session/load)
      [ -n "$id" ] && printf '{{"jsonrpc":"2.0","id":%s,"error":{{"code":-32000,"message":"Session is active in another process (PID '"$$"')"}}}}\n' "$id"
      ;;
    *)
      [ -n "$id" ] && printf '{{"jsonrpc":"2.0","id":%s,"result":{{}}}}\n' "$id"
      ;;
  esac
done
"#,
        preamble = dispatch_preamble()
    )
}
