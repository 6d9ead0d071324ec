//! Command/result correlation and path timeouts.
//!
//! Every command sent out of an extension registers an out-path keyed by
//! `cmd_id`; the matching results resolve it. `send_cmd` callers hold a
//! oneshot receiver that fires on the terminal (`is_completed`) result;
//! intermediate results are absorbed. `send_cmd_ex` callers hold a stream
//! receiver that sees every result. Inbound commands register an in-path
//! so the reply can be validated and routed back to the source.
//!
//! Paths expire: a periodic sweep abandons entries older than the
//! configured timeouts, delivering an error-status result to out-path
//! waiters.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use weft_api::msg::{CmdResult, Loc};
use weft_api::schema::Schema;
use weft_api::value::Value;

/// How a result travels back to the sender of the command.
pub(crate) enum ResultReturn {
    /// Resolves once, on the terminal result.
    OneShot(Option<oneshot::Sender<CmdResult>>),
    /// Delivers every result with a matching `cmd_id`.
    Stream(mpsc::UnboundedSender<CmdResult>),
}

pub(crate) struct OutPath {
    pub cmd_name: String,
    pub return_to: ResultReturn,
    /// Reply-tree schema from the `cmd_out` declaration.
    pub result_schema: Option<Schema>,
    pub expires_at: Instant,
}

pub(crate) struct InPath {
    pub cmd_name: String,
    pub src: Loc,
    /// Reply-tree schema from the `cmd_in` declaration.
    pub result_schema: Option<Schema>,
    pub expires_at: Instant,
}

/// Timeouts derived from the extension's `_weft.path_timeout` config, in
/// microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathTimeouts {
    pub in_path_timeout_us: u64,
    pub out_path_timeout_us: u64,
    pub check_interval_us: u64,
}

impl Default for PathTimeouts {
    fn default() -> Self {
        PathTimeouts {
            in_path_timeout_us: 600 * 1_000_000,
            out_path_timeout_us: 300 * 1_000_000,
            check_interval_us: 10 * 1_000_000,
        }
    }
}

impl PathTimeouts {
    /// Read `_weft.path_timeout` (a number sets the out-path timeout, an
    /// object sets `in_path`/`out_path` individually) and
    /// `_weft.path_check_interval` from the extension's properties, then
    /// normalize.
    pub fn from_properties(props: &Value) -> PathTimeouts {
        let mut timeouts = PathTimeouts::default();

        if let Ok(node) = props.peek_from_path("_weft.path_timeout") {
            if let Ok(us) = node.get_uint64() {
                timeouts.out_path_timeout_us = us;
            } else {
                if let Some(v) = node.object_peek("in_path").and_then(|v| v.get_uint64().ok()) {
                    timeouts.in_path_timeout_us = v;
                }
                if let Some(v) = node.object_peek("out_path").and_then(|v| v.get_uint64().ok()) {
                    timeouts.out_path_timeout_us = v;
                }
            }
        }
        if let Ok(node) = props.peek_from_path("_weft.path_check_interval") {
            if let Ok(us) = node.get_uint64() {
                timeouts.check_interval_us = us;
            }
        }

        timeouts.normalize();
        timeouts
    }

    /// An inbound command's path must outlive the fan-out it triggers:
    /// `in > out + check_interval + 1s`, enforced by raising the in-path
    /// timeout.
    pub fn normalize(&mut self) {
        let floor = self.out_path_timeout_us + self.check_interval_us + 1_000_000;
        if self.in_path_timeout_us <= floor {
            self.in_path_timeout_us = floor + 1;
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_micros(self.check_interval_us)
    }

    fn out_deadline(&self, now: Instant) -> Instant {
        now + Duration::from_micros(self.out_path_timeout_us)
    }

    fn in_deadline(&self, now: Instant) -> Instant {
        now + Duration::from_micros(self.in_path_timeout_us)
    }
}

#[derive(Default)]
pub(crate) struct PathTable {
    out_paths: HashMap<String, OutPath>,
    in_paths: HashMap<String, InPath>,
}

/// What the sweep decided about an expired out-path.
pub(crate) struct ExpiredOutPath {
    pub cmd_id: String,
    pub cmd_name: String,
    pub return_to: ResultReturn,
}

impl PathTable {
    pub fn add_out_path(
        &mut self,
        cmd_id: &str,
        cmd_name: &str,
        return_to: ResultReturn,
        result_schema: Option<Schema>,
        timeouts: &PathTimeouts,
    ) {
        self.out_paths.insert(
            cmd_id.to_string(),
            OutPath {
                cmd_name: cmd_name.to_string(),
                return_to,
                result_schema,
                expires_at: timeouts.out_deadline(Instant::now()),
            },
        );
    }

    pub fn remove_out_path(&mut self, cmd_id: &str) -> Option<OutPath> {
        self.out_paths.remove(cmd_id)
    }

    pub fn add_in_path(
        &mut self,
        cmd_id: &str,
        cmd_name: &str,
        src: Loc,
        result_schema: Option<Schema>,
        timeouts: &PathTimeouts,
    ) {
        self.in_paths.insert(
            cmd_id.to_string(),
            InPath {
                cmd_name: cmd_name.to_string(),
                src,
                result_schema,
                expires_at: timeouts.in_deadline(Instant::now()),
            },
        );
    }

    pub fn in_path(&self, cmd_id: &str) -> Option<&InPath> {
        self.in_paths.get(cmd_id)
    }

    pub fn remove_in_path(&mut self, cmd_id: &str) -> Option<InPath> {
        self.in_paths.remove(cmd_id)
    }

    /// Reply-tree schema of the pending out-path, for validating a result
    /// before delivery.
    pub fn out_path_result_schema(&self, cmd_id: &str) -> Option<Schema> {
        self.out_paths.get(cmd_id)?.result_schema.clone()
    }

    /// Deliver a result to its out-path waiter.
    ///
    /// Returns false when no path is pending under this `cmd_id` (late or
    /// stray result). The entry is removed once the terminal result has
    /// been seen.
    pub fn dispatch_result(&mut self, result: CmdResult) -> bool {
        let Some(entry) = self.out_paths.get_mut(&result.cmd_id) else {
            return false;
        };
        let completed = result.is_completed;
        let cmd_id = result.cmd_id.clone();

        match &mut entry.return_to {
            ResultReturn::OneShot(slot) => {
                // Intermediate results are absorbed; the waiter only sees
                // the terminal one.
                if completed {
                    if let Some(tx) = slot.take() {
                        let _ = tx.send(result);
                    }
                }
            }
            ResultReturn::Stream(tx) => {
                let _ = tx.send(result);
            }
        }

        if completed {
            self.out_paths.remove(&cmd_id);
        }
        true
    }

    /// Abandon every path past its deadline. Expired out-paths are handed
    /// back so the caller can synthesize error results; expired in-paths
    /// are reported by name for logging.
    pub fn sweep(&mut self, now: Instant) -> (Vec<ExpiredOutPath>, Vec<String>) {
        let expired_ids: Vec<String> = self
            .out_paths
            .iter()
            .filter(|(_, p)| p.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut expired_out = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            let path = self.out_paths.remove(&id).expect("id collected above");
            expired_out.push(ExpiredOutPath {
                cmd_id: id,
                cmd_name: path.cmd_name,
                return_to: path.return_to,
            });
        }

        let expired_in_ids: Vec<String> = self
            .in_paths
            .iter()
            .filter(|(_, p)| p.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        let mut expired_in = Vec::with_capacity(expired_in_ids.len());
        for id in expired_in_ids {
            let path = self.in_paths.remove(&id).expect("id collected above");
            expired_in.push(path.cmd_name);
        }

        (expired_out, expired_in)
    }

    pub fn pending_out_paths(&self) -> usize {
        self.out_paths.len()
    }
}

impl ExpiredOutPath {
    /// Hand the waiter an error-status result; stream waiters also see
    /// their channel close afterwards.
    pub fn notify(self) {
        let result = CmdResult::error(
            self.cmd_id.clone(),
            format!("command '{}' timed out", self.cmd_name),
        );
        match self.return_to {
            ResultReturn::OneShot(Some(tx)) => {
                let _ = tx.send(result);
            }
            ResultReturn::OneShot(None) => {}
            ResultReturn::Stream(tx) => {
                let _ = tx.send(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_api::msg::{Cmd, StatusCode};

    #[test]
    fn timeout_invariant_enforced_by_normalize() {
        let props = Value::from_json_str(
            r#"{"_weft":{"path_timeout":{"in_path":1000,"out_path":5000000},
                 "path_check_interval":2000000}}"#,
        )
        .unwrap();
        let t = PathTimeouts::from_properties(&props);
        assert!(t.in_path_timeout_us > t.out_path_timeout_us + t.check_interval_us + 1_000_000);
        assert_eq!(t.out_path_timeout_us, 5_000_000);
        assert_eq!(t.check_interval_us, 2_000_000);
    }

    #[test]
    fn scalar_path_timeout_sets_out_path() {
        let props = Value::from_json_str(r#"{"_weft":{"path_timeout":7000000}}"#).unwrap();
        let t = PathTimeouts::from_properties(&props);
        assert_eq!(t.out_path_timeout_us, 7_000_000);
    }

    #[test]
    fn defaults_satisfy_the_invariant() {
        let t = PathTimeouts::default();
        assert!(t.in_path_timeout_us > t.out_path_timeout_us + t.check_interval_us + 1_000_000);
    }

    fn result_for(cmd: &Cmd, completed: bool) -> CmdResult {
        if completed {
            CmdResult::from_cmd(cmd, StatusCode::Ok)
        } else {
            CmdResult::continued_from_cmd(cmd, StatusCode::Ok)
        }
    }

    #[test]
    fn oneshot_absorbs_intermediate_results() {
        let mut table = PathTable::default();
        let timeouts = PathTimeouts::default();

        let mut cmd = Cmd::create("job").unwrap();
        cmd.ensure_cmd_id();

        let (tx, mut rx) = oneshot::channel();
        table.add_out_path(&cmd.cmd_id, "job", ResultReturn::OneShot(Some(tx)), None, &timeouts);

        table.dispatch_result(result_for(&cmd, false));
        assert!(rx.try_recv().is_err());
        assert_eq!(table.pending_out_paths(), 1);

        table.dispatch_result(result_for(&cmd, true));
        assert!(rx.try_recv().unwrap().is_completed);
        assert_eq!(table.pending_out_paths(), 0);
    }

    #[test]
    fn stream_sees_every_result() {
        let mut table = PathTable::default();
        let timeouts = PathTimeouts::default();

        let mut cmd = Cmd::create("job").unwrap();
        cmd.ensure_cmd_id();

        let (tx, mut rx) = mpsc::unbounded_channel();
        table.add_out_path(&cmd.cmd_id, "job", ResultReturn::Stream(tx), None, &timeouts);

        table.dispatch_result(result_for(&cmd, false));
        table.dispatch_result(result_for(&cmd, false));
        table.dispatch_result(result_for(&cmd, true));

        assert!(!rx.try_recv().unwrap().is_completed);
        assert!(!rx.try_recv().unwrap().is_completed);
        assert!(rx.try_recv().unwrap().is_completed);
        assert_eq!(table.pending_out_paths(), 0);
    }

    #[test]
    fn stray_results_are_ignored() {
        let mut table = PathTable::default();
        let mut cmd = Cmd::create("job").unwrap();
        cmd.ensure_cmd_id();
        assert!(!table.dispatch_result(result_for(&cmd, true)));
    }

    #[test]
    fn sweep_expires_old_paths() {
        let mut table = PathTable::default();
        let timeouts = PathTimeouts {
            in_path_timeout_us: 10,
            out_path_timeout_us: 5,
            check_interval_us: 1,
        };

        let mut cmd = Cmd::create("slow").unwrap();
        cmd.ensure_cmd_id();
        let (tx, mut rx) = oneshot::channel();
        table.add_out_path(&cmd.cmd_id, "slow", ResultReturn::OneShot(Some(tx)), None, &timeouts);
        table.add_in_path(&cmd.cmd_id, "slow", Loc::default(), None, &timeouts);

        let (expired_out, expired_in) =
            table.sweep(Instant::now() + Duration::from_secs(1));
        assert_eq!(expired_out.len(), 1);
        assert_eq!(expired_in, vec!["slow".to_string()]);
        assert_eq!(table.pending_out_paths(), 0);

        for expired in expired_out {
            expired.notify();
        }
        let result = rx.try_recv().unwrap();
        assert_eq!(result.status_code, StatusCode::Error);
        assert!(result.is_completed);
    }
}
