#![allow(dead_code)]

pub mod mock_chain;

pub use mock_chain::*;

use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;

use private_lending_bridge::chain::StaticIdentity;
use private_lending_bridge::fees::FeeSchedule;
use private_lending_bridge::field::Fr;
use private_lending_bridge::flows::{ContractAddresses, FlowSettings, Orchestrator};
use private_lending_bridge::retry::RetryPolicy;
use private_lending_bridge::store::MemorySecretStore;

pub const OWNER: u64 = 0x0a11_ce;
pub const TOKEN: u64 = 0x70ce;
pub const INITIAL_BALANCE: u128 = 10_000_000;
pub const DECIMALS: u8 = 6;

pub fn asset() -> Address {
    Address::repeat_byte(0xa5)
}

pub fn owner() -> Fr {
    Fr::from_u64(OWNER)
}

pub fn token() -> Fr {
    Fr::from_u64(TOKEN)
}

/// Orchestrator wired to a fresh simulated world
pub struct Harness {
    pub world: World,
    pub store: Arc<MemorySecretStore>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new() -> Self {
        let world = World::new(owner());
        world.list_token(asset(), token());
        world.mint(token(), owner(), INITIAL_BALANCE);

        let store = Arc::new(MemorySecretStore::new());
        let contracts = ContractAddresses {
            lending_portal: world.lending_portal,
            token_portal: world.token_portal,
            program: world.program,
        };
        let settings = FlowSettings {
            poll_interval: Duration::from_millis(1),
            message_wait_ceiling: Duration::from_millis(50),
            receipt_timeout: Duration::from_millis(50),
            max_deadline_window: 7 * 24 * 3600,
            retry: RetryPolicy::none(),
            fees: FeeSchedule::default(),
            scan_from_block: 0,
        };
        let identity = StaticIdentity {
            l1: Address::repeat_byte(0x0e),
            l2: owner(),
        };

        let orchestrator = Orchestrator::new(
            Arc::new(world.l1()),
            Arc::new(world.l2()),
            store.clone(),
            Arc::new(identity),
            contracts,
            settings,
        );

        Self {
            world,
            store,
            orchestrator,
        }
    }

    /// Deadline comfortably inside the accepted window
    pub fn deadline(&self) -> u64 {
        self.world.now() + 3_600
    }

    pub fn balance(&self) -> u128 {
        self.world.balance(token(), owner())
    }
}
