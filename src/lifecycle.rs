// src/lifecycle.rs
//! The channel lifecycle sequencer.
//!
//! Drives one authenticated connection through query, create-or-reuse,
//! funding, close, and withdrawal, strictly forward. Funding confirmation
//! is best-effort by default: when the deposit never becomes visible
//! on-chain within the polling budget, the run proceeds and the report says
//! what was observed. Withdrawal failures are likewise downgraded, the run
//! completes with the funds left in custody.

use std::str::FromStr;
use std::time::Duration;

use ethers::types::{H256, U256};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, PreparedCall, TxOutcome};
use crate::error::{ChainError, LifecycleError, RpcError};
use crate::protocol::{
    methods, ChannelInfo, ChannelOpResult, CloseChannelParams, CreateChannelParams,
    GetChannelsParams, GetChannelsResult, GetLedgerBalancesParams, GetLedgerBalancesResult,
    ResizeChannelParams, ServerUpdate,
};
use crate::rpc::{AuthOptions, Connection};
use crate::types::{short_hex, ChannelHandle, ChannelStatus, ChannelTarget};

/// Where the sequencer stands. Phases only move forward; `Creating` and
/// `Reusing` are alternatives at the same position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Authenticating,
    QueryingChannels,
    Creating,
    Reusing,
    Funding,
    Closing,
    Withdrawing,
    Done,
}

impl Phase {
    fn rank(self) -> u8 {
        match self {
            Phase::Disconnected => 0,
            Phase::Authenticating => 1,
            Phase::QueryingChannels => 2,
            Phase::Creating | Phase::Reusing => 3,
            Phase::Funding => 4,
            Phase::Closing => 5,
            Phase::Withdrawing => 6,
            Phase::Done => 7,
        }
    }

    pub fn can_advance_to(self, next: Phase) -> bool {
        next.rank() > self.rank()
    }
}

/// What to do when the funding deposit never confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FundingPolicy {
    /// Warn and carry on with whatever balance was observed.
    #[default]
    BestEffort,
    /// Treat an unconfirmed deposit as fatal.
    Strict,
}

impl FromStr for FundingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "best-effort" | "best_effort" => Ok(FundingPolicy::BestEffort),
            "strict" => Ok(FundingPolicy::Strict),
            other => Err(format!("unknown funding policy {other:?}")),
        }
    }
}

/// Tunables for one lifecycle run.
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    /// Minimum allocation an existing open channel needs to be reused.
    pub reuse_threshold: U256,
    /// Deposit moved into a freshly created channel.
    pub deposit_amount: U256,
    /// Delay between on-chain balance checks while the deposit confirms.
    pub poll_interval: Duration,
    /// Balance checks before confirmation is abandoned.
    pub poll_attempts: u32,
    /// Wait between close settlement and withdrawal.
    pub settle_delay: Duration,
    /// How long to keep listening for late server pushes after the close
    /// settles. Duplicate close confirmations arrive in this window.
    pub drain_window: Duration,
    pub funding: FundingPolicy,
    /// Deadline for read-only node calls.
    pub query_timeout: Duration,
    /// Deadline for node calls that prepare on-chain transactions.
    pub channel_op_timeout: Duration,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            reuse_threshold: U256::from(20),
            deposit_amount: U256::from(20),
            poll_interval: Duration::from_secs(2),
            poll_attempts: 30,
            settle_delay: Duration::from_secs(5),
            drain_window: Duration::from_millis(250),
            funding: FundingPolicy::default(),
            query_timeout: Duration::from_secs(10),
            channel_op_timeout: Duration::from_secs(30),
        }
    }
}

/// How the funding step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingOutcome {
    /// An existing channel already held enough; nothing was deposited.
    Skipped,
    /// The deposit became visible on-chain.
    Confirmed { balance: U256 },
    /// The polling budget ran out before the deposit showed.
    Underfunded { observed: U256, required: U256 },
}

/// How the withdrawal step ended. Deferral is not an error: the funds stay
/// in custody and can be withdrawn by a later run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawalOutcome {
    Withdrawn { amount: U256, tx_hash: H256 },
    Deferred { reason: String },
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct LifecycleReport {
    pub channel: ChannelHandle,
    pub reused: bool,
    pub funding: FundingOutcome,
    pub withdrawal: WithdrawalOutcome,
}

/// One full pass over a channel: authenticate, query, create or reuse,
/// fund, close, withdraw.
pub struct ChannelLifecycle<'a> {
    conn: &'a Connection,
    chain: &'a dyn ChainClient,
    target: ChannelTarget,
    policy: LifecyclePolicy,
    phase: Phase,
    /// Set before the close transaction goes out, so duplicate close
    /// confirmations from the node cannot trigger a second submission.
    close_submitted: bool,
}

impl<'a> ChannelLifecycle<'a> {
    pub fn new(
        conn: &'a Connection,
        chain: &'a dyn ChainClient,
        target: ChannelTarget,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            conn,
            chain,
            target,
            policy,
            phase: Phase::Disconnected,
            close_submitted: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "phase may only move forward: {:?} -> {:?}",
            self.phase,
            next
        );
        info!(from = ?self.phase, to = ?next, "lifecycle advancing");
        self.phase = next;
    }

    /// Run the whole lifecycle once and report how each step went.
    pub async fn run(&mut self, auth: &AuthOptions) -> Result<LifecycleReport, LifecycleError> {
        // subscribe before anything else so no push can slip past us
        let mut updates = self.conn.updates();

        self.advance(Phase::Authenticating);
        self.conn.authenticate(self.target.address, auth).await?;

        self.advance(Phase::QueryingChannels);
        let channels = self.query_channels().await?;
        self.log_ledger_balances().await;

        let reusable = channels
            .iter()
            .find(|c| c.reusable(self.target.token, self.policy.reuse_threshold));

        let (mut handle, reused, funding) = match reusable {
            Some(found) => {
                self.advance(Phase::Reusing);
                info!(
                    channel = %short_hex(&found.channel_id),
                    amount = %found.amount,
                    "reusing open channel, skipping funding"
                );
                (ChannelHandle::from(found), true, FundingOutcome::Skipped)
            }
            None => {
                self.advance(Phase::Creating);
                let mut handle = self.create_channel().await?;
                self.advance(Phase::Funding);
                let funding = self.fund_channel(&mut handle).await?;
                (handle, false, funding)
            }
        };

        self.advance(Phase::Closing);
        self.close_channel(&mut handle, &mut updates).await?;

        self.advance(Phase::Withdrawing);
        debug!(delay = ?self.policy.settle_delay, "waiting for closed funds to settle");
        tokio::time::sleep(self.policy.settle_delay).await;
        let withdrawal = self.finish_withdrawal().await;

        self.advance(Phase::Done);
        Ok(LifecycleReport {
            channel: handle,
            reused,
            funding,
            withdrawal,
        })
    }

    async fn query_channels(&self) -> Result<Vec<ChannelInfo>, RpcError> {
        let params = GetChannelsParams {
            participant: self.target.address,
        };
        let result: GetChannelsResult = self
            .conn
            .call_typed(methods::GET_CHANNELS, &params, self.policy.query_timeout)
            .await?;
        info!(count = result.channels.len(), "channel query answered");
        Ok(result.channels)
    }

    /// Informational only. A failed ledger query is logged and the run
    /// continues.
    async fn log_ledger_balances(&self) {
        let params = GetLedgerBalancesParams {
            participant: self.target.address,
        };
        let reply: Result<GetLedgerBalancesResult, _> = self
            .conn
            .call_typed(
                methods::GET_LEDGER_BALANCES,
                &params,
                self.policy.query_timeout,
            )
            .await;
        match reply {
            Ok(result) => {
                for entry in &result.balances {
                    info!(asset = %entry.asset, amount = %entry.amount, "ledger balance");
                }
            }
            Err(e) => warn!(error = %e, "ledger balance query failed, continuing"),
        }
    }

    /// Ask the node for a new channel and anchor it in custody. The channel
    /// starts empty; funding is a separate resize.
    async fn create_channel(&mut self) -> Result<ChannelHandle, LifecycleError> {
        let params = CreateChannelParams {
            chain_id: self.target.chain_id,
            token: self.target.token,
            amount: U256::zero(),
            adjudicator: self.target.adjudicator,
        };
        let result: ChannelOpResult = self
            .conn
            .call_typed(
                methods::CREATE_CHANNEL,
                &params,
                self.policy.channel_op_timeout,
            )
            .await?;
        let outcome = self.chain.submit(&result.call).await?;
        info!(
            channel = %short_hex(&result.channel_id),
            tx = ?outcome.tx_hash,
            "channel anchored on-chain"
        );
        let mut handle = ChannelHandle::new(result.channel_id, self.target.token);
        handle.status = ChannelStatus::Open;
        Ok(handle)
    }

    /// Resize the channel by the deposit amount, then poll custody until
    /// the deposit is visible or the attempt budget runs out.
    async fn fund_channel(
        &mut self,
        handle: &mut ChannelHandle,
    ) -> Result<FundingOutcome, LifecycleError> {
        let params = ResizeChannelParams {
            channel_id: handle.id,
            allocate_amount: self.policy.deposit_amount,
        };
        let result: ChannelOpResult = self
            .conn
            .call_typed(
                methods::RESIZE_CHANNEL,
                &params,
                self.policy.channel_op_timeout,
            )
            .await?;
        let outcome = self.chain.submit(&result.call).await?;
        info!(tx = ?outcome.tx_hash, amount = %self.policy.deposit_amount, "deposit submitted");
        handle.credit(self.policy.deposit_amount);

        // visibility lags the receipt, so sleep first and check after
        let required = self.policy.deposit_amount;
        let mut last_seen = U256::zero();
        for attempt in 1..=self.policy.poll_attempts {
            tokio::time::sleep(self.policy.poll_interval).await;
            match self.chain.channel_balance(handle.id, self.target.token).await {
                Ok(balance) => {
                    last_seen = balance;
                    if balance >= required {
                        info!(attempt, balance = %balance, "funding confirmed");
                        return Ok(FundingOutcome::Confirmed { balance });
                    }
                    debug!(attempt, balance = %balance, "deposit not visible yet");
                }
                Err(e) => debug!(attempt, error = %e, "balance check failed"),
            }
        }

        match self.policy.funding {
            FundingPolicy::BestEffort => {
                warn!(
                    observed = %last_seen,
                    required = %required,
                    "deposit unconfirmed after polling, proceeding anyway"
                );
                Ok(FundingOutcome::Underfunded {
                    observed: last_seen,
                    required,
                })
            }
            FundingPolicy::Strict => Err(LifecycleError::Underfunded {
                observed: last_seen,
                required,
            }),
        }
    }

    /// Request the close, settle the final state on-chain, then keep
    /// listening briefly for the node's own confirmation pushes.
    async fn close_channel(
        &mut self,
        handle: &mut ChannelHandle,
        updates: &mut broadcast::Receiver<ServerUpdate>,
    ) -> Result<(), LifecycleError> {
        let params = CloseChannelParams {
            channel_id: handle.id,
            funds_destination: self.target.address,
        };
        let result: ChannelOpResult = self
            .conn
            .call_typed(
                methods::CLOSE_CHANNEL,
                &params,
                self.policy.channel_op_timeout,
            )
            .await?;
        handle.status = ChannelStatus::Closing;
        self.handle_close_confirmation(result.call).await?;
        self.drain_updates(handle, updates).await?;
        handle.status = ChannelStatus::Closed;
        info!(channel = %short_hex(&handle.id), "channel closed");
        Ok(())
    }

    /// Submit the close calldata exactly once. The node re-broadcasts the
    /// confirmation both as the call result and as a channel update, so
    /// every path funnels through this guard.
    pub async fn handle_close_confirmation(
        &mut self,
        call: PreparedCall,
    ) -> Result<Option<TxOutcome>, ChainError> {
        if self.close_submitted {
            debug!("close already submitted, ignoring duplicate confirmation");
            return Ok(None);
        }
        self.close_submitted = true;
        let outcome = self.chain.submit(&call).await?;
        info!(tx = ?outcome.tx_hash, "close settled on-chain");
        Ok(Some(outcome))
    }

    async fn drain_updates(
        &mut self,
        handle: &mut ChannelHandle,
        updates: &mut broadcast::Receiver<ServerUpdate>,
    ) -> Result<(), ChainError> {
        loop {
            match tokio::time::timeout(self.policy.drain_window, updates.recv()).await {
                Ok(Ok(update)) => self.apply_update(handle, update).await?,
                Ok(Err(RecvError::Lagged(missed))) => {
                    warn!(missed, "dropped server updates while draining");
                }
                Ok(Err(RecvError::Closed)) | Err(_) => break,
            }
        }
        Ok(())
    }

    async fn apply_update(
        &mut self,
        handle: &mut ChannelHandle,
        update: ServerUpdate,
    ) -> Result<(), ChainError> {
        match update {
            ServerUpdate::Channel(update) if update.channel_id == handle.id => {
                if let Some(amount) = update.amount {
                    handle.amount = amount;
                }
                handle.status = update.status;
                if let Some(call) = update.call {
                    if matches!(update.status, ChannelStatus::Closing | ChannelStatus::Closed) {
                        self.handle_close_confirmation(call).await?;
                    }
                }
            }
            ServerUpdate::Channel(update) => {
                debug!(channel = %short_hex(&update.channel_id), "update for another channel");
            }
            ServerUpdate::Balance(update) => {
                for entry in &update.balances {
                    debug!(asset = %entry.asset, amount = %entry.amount, "balance update");
                }
            }
        }
        Ok(())
    }

    /// Pull whatever custody will release. Zero balance and failed
    /// withdrawals both defer; neither fails the run.
    async fn finish_withdrawal(&self) -> WithdrawalOutcome {
        let amount = match self
            .chain
            .withdrawable_balance(self.target.address, self.target.token)
            .await
        {
            Ok(amount) => amount,
            Err(e) => {
                warn!(error = %e, "withdrawable balance check failed, leaving funds in custody");
                return WithdrawalOutcome::Deferred {
                    reason: e.to_string(),
                };
            }
        };
        if amount.is_zero() {
            info!("no withdrawable balance after settling delay");
            return WithdrawalOutcome::Deferred {
                reason: "no withdrawable balance after settling delay".to_string(),
            };
        }
        match self.chain.withdraw(self.target.token, amount).await {
            Ok(outcome) => {
                info!(amount = %amount, tx = ?outcome.tx_hash, "withdrawal complete");
                WithdrawalOutcome::Withdrawn {
                    amount,
                    tx_hash: outcome.tx_hash,
                }
            }
            Err(e) => {
                warn!(error = %e, "withdrawal failed, funds stay in custody");
                WithdrawalOutcome::Deferred {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_only_move_forward() {
        assert!(Phase::Disconnected.can_advance_to(Phase::Authenticating));
        assert!(Phase::Authenticating.can_advance_to(Phase::QueryingChannels));
        assert!(Phase::QueryingChannels.can_advance_to(Phase::Creating));
        assert!(Phase::QueryingChannels.can_advance_to(Phase::Reusing));
        assert!(Phase::Reusing.can_advance_to(Phase::Closing));
        assert!(Phase::Funding.can_advance_to(Phase::Closing));

        assert!(!Phase::Closing.can_advance_to(Phase::Funding));
        assert!(!Phase::Done.can_advance_to(Phase::Authenticating));
        assert!(!Phase::Creating.can_advance_to(Phase::Reusing));
        assert!(!Phase::Funding.can_advance_to(Phase::Funding));
    }

    #[test]
    fn test_funding_policy_parses() {
        assert_eq!(
            "best-effort".parse::<FundingPolicy>(),
            Ok(FundingPolicy::BestEffort)
        );
        assert_eq!(
            "best_effort".parse::<FundingPolicy>(),
            Ok(FundingPolicy::BestEffort)
        );
        assert_eq!("STRICT".parse::<FundingPolicy>(), Ok(FundingPolicy::Strict));
        assert!("sometimes".parse::<FundingPolicy>().is_err());
    }

    #[test]
    fn test_default_policy_matches_node_cadence() {
        let policy = LifecyclePolicy::default();
        assert_eq!(policy.reuse_threshold, U256::from(20));
        assert_eq!(policy.poll_interval, Duration::from_secs(2));
        assert_eq!(policy.poll_attempts, 30);
        assert_eq!(policy.settle_delay, Duration::from_secs(5));
        assert_eq!(policy.drain_window, Duration::from_millis(250));
        assert_eq!(policy.funding, FundingPolicy::BestEffort);
    }
}
