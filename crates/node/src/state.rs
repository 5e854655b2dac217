//! Chain state machine: bootstrap, then consensus.

use crate::health::{self, HealthReport};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use snowfall_bootstrap::{BootstrapConfig, BootstrapState};
use snowfall_consensus::{ConsensusState, EngineConfig, EngineError, Parameters};
use snowfall_core::{Action, Event, StateMachine, SubStateMachine};
use snowfall_gas::{Calculator, FeeConfig};
use snowfall_types::{Block, BlockId, ChainId, ValidatorSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything needed to start one chain.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub params: Parameters,
    pub fee: FeeConfig,
}

enum Phase {
    Bootstrapping(BootstrapState),
    Running(ConsensusState),
}

/// Combined state machine for one chain.
///
/// Starts in the bootstrap phase: the bootstrapper owns all events until a
/// beacon quorum confirms our tip, then the decision machine takes over.
/// The gas calculator advances through both phases, once per accepted
/// block, so a freshly bootstrapped replica prices the next block exactly
/// like one that was online the whole time.
pub struct ChainStateMachine {
    config: ChainConfig,

    /// Validator snapshot for polling; refreshed at epoch boundaries.
    validators: ValidatorSet,

    phase: Phase,

    /// Gas state as of `last_accepted_ts`. Only consulted here during
    /// bootstrap; the decision machine takes it over afterwards.
    gas: Calculator,

    /// Timestamp of the newest accepted block (gas parent time).
    last_accepted_ts: u64,

    /// Seed for the decision machine's sampler rng.
    seed: u64,

    now: Duration,
}

impl std::fmt::Debug for ChainStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match &self.phase {
            Phase::Bootstrapping(_) => "bootstrapping",
            Phase::Running(_) => "running",
        };
        f.debug_struct("ChainStateMachine")
            .field("chain", &self.config.chain_id)
            .field("phase", &phase)
            .field("validators", &self.validators.len())
            .finish()
    }
}

impl ChainStateMachine {
    /// Create a chain resuming from `last_accepted` (genesis on a fresh
    /// start).
    ///
    /// Fails fast on an invalid parameter bundle or fee config; a chain
    /// with bad parameters must refuse to start.
    pub fn new(
        config: ChainConfig,
        validators: ValidatorSet,
        beacons: ValidatorSet,
        last_accepted: Block,
        seed: u64,
    ) -> Result<Self, EngineError> {
        config.params.verify()?;
        let gas = Calculator::new(config.fee)?;

        let bootstrap = BootstrapState::new(
            BootstrapConfig::from_params(config.chain_id, &config.params),
            beacons,
            last_accepted.clone(),
            ChaCha8Rng::seed_from_u64(seed),
        );

        info!(
            chain = ?config.chain_id,
            tip = ?last_accepted.id,
            height = last_accepted.height.0,
            "chain starting in bootstrap phase"
        );
        Ok(Self {
            config,
            validators,
            phase: Phase::Bootstrapping(bootstrap),
            gas,
            last_accepted_ts: last_accepted.timestamp,
            seed,
            now: Duration::ZERO,
        })
    }

    /// Kick the chain: begins bootstrapping.
    pub fn start(&mut self) -> Vec<Action> {
        match &mut self.phase {
            Phase::Bootstrapping(bootstrap) => {
                let actions = bootstrap.start();
                self.seal_bootstrap_accepts(&actions);
                actions
            }
            Phase::Running(engine) => engine.start(),
        }
    }

    /// True once bootstrap finished and polling is live.
    pub fn is_bootstrapped(&self) -> bool {
        matches!(self.phase, Phase::Running(_))
    }

    /// The decision machine, once running.
    pub fn engine(&self) -> Option<&ConsensusState> {
        match &self.phase {
            Phase::Running(engine) => Some(engine),
            Phase::Bootstrapping(_) => None,
        }
    }

    /// The chain's current preference (last accepted tip while
    /// bootstrapping).
    pub fn preference(&self) -> BlockId {
        match &self.phase {
            Phase::Bootstrapping(bootstrap) => bootstrap.last_accepted().id,
            Phase::Running(engine) => engine.preference(),
        }
    }

    /// The last accepted block.
    pub fn last_accepted(&self) -> Block {
        match &self.phase {
            Phase::Bootstrapping(bootstrap) => bootstrap.last_accepted().clone(),
            Phase::Running(engine) => engine.last_accepted().clone(),
        }
    }

    /// Evaluate chain health against a connected-stake snapshot.
    pub fn health(&self, connected_stake: u64) -> HealthReport {
        let (outstanding, oldest) = match &self.phase {
            Phase::Bootstrapping(_) => (0, None),
            Phase::Running(engine) => (engine.processing(), engine.oldest_processing_age()),
        };
        health::evaluate(
            &self.config.params,
            connected_stake,
            self.validators.total_weight(),
            outstanding,
            oldest,
            self.is_bootstrapped(),
        )
    }

    /// Shut the chain down: drain outstanding requests so the runner can
    /// stop the VM afterwards.
    pub fn shutdown(&mut self) -> Vec<Action> {
        match &mut self.phase {
            Phase::Bootstrapping(_) => vec![],
            Phase::Running(engine) => engine.drain(),
        }
    }

    /// During bootstrap the node owns the gas state: advance it for every
    /// block the bootstrapper accepted.
    fn seal_bootstrap_accepts(&mut self, actions: &[Action]) {
        for action in actions {
            if let Action::NotifyAccepted { block } = action {
                if let Err(err) =
                    self.gas
                        .seal_block(self.last_accepted_ts, block.timestamp, block.gas_used)
                {
                    panic!(
                        "gas invariant broken bootstrapping {} (height {}): {err}",
                        block.id, block.height.0
                    );
                }
                self.last_accepted_ts = block.timestamp;
            }
        }
    }

    /// Switch from bootstrap to normal operation.
    fn promote(&mut self) -> Vec<Action> {
        let Phase::Bootstrapping(bootstrap) = &self.phase else {
            warn!("duplicate bootstrap completion ignored");
            return vec![];
        };
        let tip = bootstrap.last_accepted().clone();

        let engine_config = EngineConfig {
            chain_id: self.config.chain_id,
            params: self.config.params,
            ..EngineConfig::new(self.config.chain_id)
        };
        // The sampler seed is derived, not reused: the bootstrap rng and
        // the poll rng must not be correlated.
        let rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_mul(0x9e3779b97f4a7c15) ^ 1);

        let mut engine = ConsensusState::new(
            engine_config,
            self.validators.clone(),
            tip,
            self.gas.clone(),
            rng,
        )
        .expect("parameters were verified at chain start");
        engine.set_time(self.now);

        info!(chain = ?self.config.chain_id, "chain bootstrapped, polling begins");
        let actions = engine.start();
        self.phase = Phase::Running(engine);
        actions
    }
}

impl StateMachine for ChainStateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        // Phase switch is the node's own event.
        if let Event::BootstrapCompleted { .. } = &event {
            return self.promote();
        }

        // Epoch refresh applies to whichever phase comes next.
        if let Event::ValidatorSetUpdated { validators } = &event {
            self.validators = validators.clone();
            // The running engine keeps its own snapshot.
            if let Phase::Running(engine) = &mut self.phase {
                return engine
                    .try_handle(&event)
                    .expect("engine handles validator updates");
            }
            return vec![];
        }

        match &mut self.phase {
            Phase::Bootstrapping(bootstrap) => match bootstrap.try_handle(&event) {
                Some(actions) => {
                    self.seal_bootstrap_accepts(&actions);
                    actions
                }
                None => {
                    debug!(event = event.type_name(), "event ignored while bootstrapping");
                    vec![]
                }
            },
            Phase::Running(engine) => match engine.try_handle(&event) {
                Some(actions) => actions,
                None => {
                    warn!(event = event.type_name(), "unhandled event");
                    vec![]
                }
            },
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
        match &mut self.phase {
            Phase::Bootstrapping(bootstrap) => bootstrap.set_time(now),
            Phase::Running(engine) => engine.set_time(now),
        }
    }

    fn now(&self) -> Duration {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snowfall_gas::Dimensions;
    use snowfall_types::test_utils::{test_block, test_node, test_validator_set};
    use snowfall_types::{NodeId, RequestId};

    fn fee() -> FeeConfig {
        FeeConfig {
            min_gas_price: 1,
            weights: Dimensions([1, 1, 1, 1]),
            max_gas_per_second: 1_000_000,
            leak_gas_coeff: 10,
            update_denominator: 1_000,
            gas_target_rate: 100,
        }
    }

    fn chain(k: usize) -> ChainStateMachine {
        let params = Parameters {
            k,
            alpha_preference: (k / 2 + 1) as u64,
            alpha_confidence: (k / 2 + 1) as u64,
            beta_virtuous: 2,
            beta_rogue: 3,
            concurrent_repolls: 1,
            ..Parameters::default()
        };
        ChainStateMachine::new(
            ChainConfig {
                chain_id: ChainId::ZERO,
                params,
                fee: fee(),
            },
            test_validator_set(k as u8),
            test_validator_set(k as u8),
            test_block(0, 255, 0),
            42,
        )
        .unwrap()
    }

    fn chits(peer: NodeId, request_id: RequestId, id: snowfall_types::BlockId) -> Event {
        Event::ChitsReceived {
            peer,
            request_id,
            preferred_id: id,
            preferred_id_at_height: id,
            accepted_id: id,
        }
    }

    fn tip_round_id(actions: &[Action]) -> RequestId {
        actions
            .iter()
            .find_map(|a| match a {
                Action::Send {
                    message: snowfall_core::OutboundMessage::PullQuery { request_id, .. },
                    ..
                } => Some(*request_id),
                _ => None,
            })
            .expect("a query went out")
    }

    #[test]
    fn invalid_parameters_refuse_to_start() {
        let params = Parameters {
            k: 20,
            alpha_preference: 9,
            ..Parameters::default()
        };
        let result = ChainStateMachine::new(
            ChainConfig {
                chain_id: ChainId::ZERO,
                params,
                fee: fee(),
            },
            test_validator_set(5),
            test_validator_set(5),
            test_block(0, 255, 0),
            1,
        );
        assert!(matches!(result, Err(EngineError::Parameters(_))));
    }

    #[test]
    fn bootstrap_completion_promotes_to_consensus() {
        let mut chain = chain(3);
        let actions = chain.start();
        assert!(!chain.is_bootstrapped());

        let rid = tip_round_id(&actions);
        let tip = chain.last_accepted().id;
        let mut completed = Vec::new();
        for peer in 0..3 {
            completed = chain.handle(chits(test_node(peer), rid, tip));
        }

        // The bootstrapper asked for BootstrapCompleted to be enqueued; the
        // runner would feed it back.
        let event = completed
            .iter()
            .find_map(|a| match a {
                Action::EnqueueInternal { event } => Some(event.clone()),
                _ => None,
            })
            .expect("bootstrap completion enqueued");
        chain.handle(event);

        assert!(chain.is_bootstrapped());
        assert_eq!(chain.preference(), tip);
    }

    #[test]
    fn promoted_chain_polls_after_block_arrives() {
        let mut chain = chain(3);
        let actions = chain.start();
        let rid = tip_round_id(&actions);
        let tip = chain.last_accepted().id;
        let mut completed = Vec::new();
        for peer in 0..3 {
            completed = chain.handle(chits(test_node(peer), rid, tip));
        }
        let event = completed
            .iter()
            .find_map(|a| match a {
                Action::EnqueueInternal { event } => Some(event.clone()),
                _ => None,
            })
            .unwrap();
        chain.handle(event);

        // A block arrives and verifies: the engine opens a poll.
        let block = test_block(1, 0, 1);
        let actions = chain.handle(Event::BlockVerified {
            block,
            valid: true,
        });
        assert!(
            actions.iter().any(|a| matches!(
                a,
                Action::Send {
                    message: snowfall_core::OutboundMessage::PullQuery { .. },
                    ..
                }
            )),
            "expected a poll to open, got {actions:?}"
        );
    }

    #[test]
    fn health_reports_bootstrapping_then_healthy() {
        let mut chain = chain(3);
        assert_eq!(
            chain.health(3).status,
            crate::health::HealthStatus::Bootstrapping
        );

        let actions = chain.start();
        let rid = tip_round_id(&actions);
        let tip = chain.last_accepted().id;
        let mut completed = Vec::new();
        for peer in 0..3 {
            completed = chain.handle(chits(test_node(peer), rid, tip));
        }
        let event = completed
            .iter()
            .find_map(|a| match a {
                Action::EnqueueInternal { event } => Some(event.clone()),
                _ => None,
            })
            .unwrap();
        chain.handle(event);

        assert!(chain.health(3).is_healthy());
        assert_eq!(
            chain.health(1).status,
            crate::health::HealthStatus::InsufficientStake
        );
    }
}
