//! In-process settlement chain and privacy rollup
//!
//! `World` holds the state of both chains: the L1 lending and token portals,
//! the L2 lending program and token, and the message trees between them.
//! `SimL1` and `SimL2` expose it through the client traits. The program side
//! derives intent ids with its own hasher calls so tests compare them against
//! what the client computed.

use async_trait::async_trait;
use ethers::abi::{decode, encode, ParamType, Token};
use ethers::types::{Address, Bytes, Log, TransactionReceipt, H256, U256, U64};
use ethers::utils::id;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use private_lending_bridge::chain::{
    InclusionWitness, L1Call, L1Client, L2Call, L2Client, L2TxReceipt, MessageSource,
};
use private_lending_bridge::commitment::{separators, FieldHasher, Intent, Keccak256Hasher};
use private_lending_bridge::contracts::portal::{
    decode_execute, selector, EXECUTE_DEPOSIT_SIG, EXECUTE_WITHDRAW_SIG, INTENT_CONSUMED_SIG,
};
use private_lending_bridge::error::{classify_revert, BridgeError, BridgeResult};
use private_lending_bridge::events::topics;
use private_lending_bridge::field::Fr;

pub const START_TIME: u64 = 1_700_000_000;
pub const FEE_BPS: u128 = 10;

const DEPOSIT_MESSAGE_SEP: u32 = 0x4443_4f4e;
const WITHDRAW_MESSAGE_SEP: u32 = 0x5752_4554;
const BRIDGE_MESSAGE_SEP: u32 = 0x4252_4447;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntentKind {
    Deposit,
    Withdraw,
}

#[derive(Debug, Clone)]
struct ProgramIntent {
    intent: Intent,
    kind: IntentKind,
    status: u64,
    request_block: u64,
    /// Position the intent acts on
    nonce: Fr,
    token: Fr,
}

#[derive(Debug, Clone)]
struct SimPosition {
    status: u64,
    asset: Address,
    shares: u128,
    net: u128,
    decimals: u8,
    deadline: u64,
    intent_id: Fr,
    token: Fr,
}

#[derive(Debug, Clone)]
struct InboxMessage {
    included_at: u64,
    leaf_index: u64,
    amount: u128,
    secret_hash: Fr,
}

#[derive(Debug, Default)]
struct State {
    l1_block: u64,
    l2_block: u64,
    l1_time: u64,
    l2_time: u64,
    tx_counter: u64,

    // L1
    logs: Vec<Log>,
    receipts: HashMap<H256, TransactionReceipt>,
    consumed: HashSet<Fr>,
    l1_sent: Vec<[u8; 4]>,

    // L2
    token_for_asset: HashMap<Address, Fr>,
    balances: HashMap<(Fr, Fr), u128>,
    intents: HashMap<Fr, ProgramIntent>,
    positions: HashMap<Fr, SimPosition>,
    outbox: HashMap<Fr, (u64, u64)>,
    inbox: HashMap<Fr, InboxMessage>,
    claimed: HashSet<Fr>,
    l2_receipts: HashMap<String, L2TxReceipt>,
    l2_submitted: Vec<String>,
    next_leaf: u64,

    hold_outbox: bool,
    hold_inbox: bool,
    race_next_execution: bool,
    drop_next_submission: bool,
}

/// Shared state of both simulated chains
#[derive(Clone)]
pub struct World {
    state: Arc<Mutex<State>>,
    pub caller: Fr,
    pub program: Fr,
    pub lending_portal: Address,
    pub token_portal: Address,
}

impl World {
    pub fn new(caller: Fr) -> Self {
        let state = State {
            l1_block: 100,
            l2_block: 10,
            l1_time: START_TIME,
            l2_time: START_TIME,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            caller,
            program: Fr::from_u64(0x9209),
            lending_portal: Address::repeat_byte(0x1e),
            token_portal: Address::repeat_byte(0x70),
        }
    }

    pub fn l1(&self) -> SimL1 {
        SimL1 {
            world: self.clone(),
        }
    }

    pub fn l2(&self) -> SimL2 {
        SimL2 {
            world: self.clone(),
        }
    }

    pub fn list_token(&self, asset: Address, token: Fr) {
        self.state.lock().unwrap().token_for_asset.insert(asset, token);
    }

    pub fn mint(&self, token: Fr, owner: Fr, amount: u128) {
        *self
            .state
            .lock()
            .unwrap()
            .balances
            .entry((token, owner))
            .or_default() += amount;
    }

    pub fn balance(&self, token: Fr, owner: Fr) -> u128 {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(&(token, owner))
            .copied()
            .unwrap_or(0)
    }

    /// Move both clocks forward
    pub fn advance_time(&self, secs: u64) {
        let mut state = self.state.lock().unwrap();
        state.l1_time += secs;
        state.l2_time += secs;
    }

    pub fn now(&self) -> u64 {
        self.state.lock().unwrap().l2_time
    }

    /// Keep L2 to L1 messages unprovable
    pub fn hold_outbox(&self, hold: bool) {
        self.state.lock().unwrap().hold_outbox = hold;
    }

    /// Keep L1 to L2 messages out of the tree
    pub fn hold_inbox(&self, hold: bool) {
        self.state.lock().unwrap().hold_inbox = hold;
    }

    /// The next execution lands from another sender; ours reverts
    pub fn race_next_execution(&self) {
        self.state.lock().unwrap().race_next_execution = true;
    }

    /// The next L2 submission is lost in transit
    pub fn drop_next_submission(&self) {
        self.state.lock().unwrap().drop_next_submission = true;
    }

    pub fn l1_sent(&self) -> usize {
        self.state.lock().unwrap().l1_sent.len()
    }

    pub fn l2_submitted(&self) -> Vec<String> {
        self.state.lock().unwrap().l2_submitted.clone()
    }

    /// Intent id as derived by the program, for the intent carrying `secret_hash`
    pub fn program_intent_id(&self, secret_hash: &Fr) -> Option<Fr> {
        self.state
            .lock()
            .unwrap()
            .intents
            .values()
            .find(|i| i.intent.secret_hash == *secret_hash)
            .map(|i| i.intent.intent_id)
    }

    pub fn position_status(&self, nonce: &Fr) -> u64 {
        self.state
            .lock()
            .unwrap()
            .positions
            .get(nonce)
            .map(|p| p.status)
            .unwrap_or(0)
    }

    /// Lock funds in the token portal for a private L2 claim
    pub fn bridge_to_l2(&self, amount: u128, secret_hash: Fr) -> Fr {
        let mut state = self.state.lock().unwrap();
        state.tx_counter += 1;
        let key = hash(BRIDGE_MESSAGE_SEP, &[secret_hash, Fr::from_u64(state.tx_counter)]);
        let leaf_index = state.push_inbox(key, amount, secret_hash);

        let tx_hash = H256::from_low_u64_be(state.tx_counter);
        state.l1_block += 1;
        let log = bridge_log(
            self.token_portal,
            amount,
            secret_hash,
            key,
            leaf_index,
            state.l1_block,
            tx_hash,
        );
        state.logs.push(log);
        key
    }
}

impl State {
    fn next_tx(&mut self) -> u64 {
        self.tx_counter += 1;
        self.tx_counter
    }

    fn push_inbox(&mut self, key: Fr, amount: u128, secret_hash: Fr) -> u64 {
        let leaf_index = self.next_leaf;
        self.next_leaf += 1;
        self.inbox.insert(
            key,
            InboxMessage {
                included_at: self.l2_block,
                leaf_index,
                amount,
                secret_hash,
            },
        );
        leaf_index
    }

    fn balance_mut(&mut self, token: Fr, owner: Fr) -> &mut u128 {
        self.balances.entry((token, owner)).or_default()
    }
}

fn hash(separator: u32, inputs: &[Fr]) -> Fr {
    Keccak256Hasher.hash(separator, inputs)
}

fn revert(reason: &str) -> BridgeError {
    classify_revert(reason, "sim")
}

fn arg_u128(call: &L2Call, index: usize) -> u128 {
    call.args[index].to_u128().unwrap()
}

fn arg_u64(call: &L2Call, index: usize) -> u64 {
    call.args[index].to_u64().unwrap()
}

fn b32(value: &Fr) -> Token {
    Token::FixedBytes(value.to_bytes_be().to_vec())
}

fn bridge_log(
    emitter: Address,
    amount: u128,
    secret_hash: Fr,
    key: Fr,
    index: u64,
    block: u64,
    tx_hash: H256,
) -> Log {
    Log {
        address: emitter,
        topics: vec![*topics::DEPOSIT_TO_L2_PRIVATE],
        data: encode(&[
            Token::Uint(U256::from(amount)),
            b32(&secret_hash),
            b32(&key),
            Token::Uint(U256::from(index)),
        ])
        .into(),
        block_number: Some(U64::from(block)),
        transaction_hash: Some(tx_hash),
        ..Default::default()
    }
}

fn confirmation_log(
    emitter: Address,
    topic: H256,
    intent_id: Fr,
    amount: u128,
    key: Fr,
    index: u64,
    block: u64,
    tx_hash: H256,
) -> Log {
    Log {
        address: emitter,
        topics: vec![topic, intent_id.to_h256()],
        data: encode(&[
            Token::Uint(U256::from(amount)),
            b32(&key),
            Token::Uint(U256::from(index)),
        ])
        .into(),
        block_number: Some(U64::from(block)),
        transaction_hash: Some(tx_hash),
        ..Default::default()
    }
}

/// Settlement chain view of the world
pub struct SimL1 {
    world: World,
}

impl SimL1 {
    fn execute(&self, data: &[u8]) -> BridgeResult<H256> {
        let deposit = selector(data) == Some(id(EXECUTE_DEPOSIT_SIG));
        let call = decode_execute(data)?;
        let intent_id = call.intent.intent_id;
        let world = &self.world;
        let mut state = world.state.lock().unwrap();

        if state.consumed.contains(&intent_id) {
            return Err(revert("intent already consumed"));
        }
        let recorded = state
            .intents
            .get(&intent_id)
            .cloned()
            .ok_or_else(|| revert("unknown intent"))?;
        if recorded.intent != call.intent {
            return Err(revert("intent mismatch"));
        }
        let expected_kind = if deposit {
            IntentKind::Deposit
        } else {
            IntentKind::Withdraw
        };
        if recorded.kind != expected_kind {
            return Err(revert("wrong execution kind"));
        }
        let message = hash(separators::OUTBOUND_MESSAGE, &[intent_id]);
        match state.outbox.get(&message) {
            Some((block, leaf)) if *block == call.l2_block && *leaf == call.witness.leaf_index => {}
            _ => return Err(revert("invalid outbox proof")),
        }
        if call.intent.deadline <= state.l1_time {
            return Err(revert("deadline passed"));
        }

        state.consumed.insert(intent_id);
        let tx_hash = H256::from_low_u64_be(state.next_tx());
        state.l1_block += 1;
        let block = state.l1_block;

        // pool exchange rate is 1:1 in both directions
        let amount = call.intent.amount;
        let mut logs = Vec::new();
        if deposit {
            let key = hash(DEPOSIT_MESSAGE_SEP, &[intent_id]);
            let index = state.push_inbox(key, amount, call.intent.secret_hash);
            logs.push(confirmation_log(
                world.lending_portal,
                *topics::DEPOSIT_CONFIRMED,
                intent_id,
                amount,
                key,
                index,
                block,
                tx_hash,
            ));
        } else {
            let key = hash(WITHDRAW_MESSAGE_SEP, &[intent_id]);
            let index = state.push_inbox(key, amount, call.intent.secret_hash);
            logs.push(confirmation_log(
                world.lending_portal,
                *topics::WITHDRAW_CONFIRMED,
                intent_id,
                amount,
                key,
                index,
                block,
                tx_hash,
            ));
            logs.push(bridge_log(
                world.token_portal,
                amount,
                call.intent.secret_hash,
                key,
                index,
                block,
                tx_hash,
            ));
        }

        state.logs.extend(logs.iter().cloned());
        state.receipts.insert(
            tx_hash,
            TransactionReceipt {
                transaction_hash: tx_hash,
                block_number: Some(U64::from(block)),
                status: Some(U64::from(1)),
                logs,
                ..Default::default()
            },
        );
        Ok(tx_hash)
    }
}

#[async_trait]
impl L1Client for SimL1 {
    async fn send_transaction(&self, call: L1Call) -> BridgeResult<H256> {
        if call.to != self.world.lending_portal {
            return Err(revert("no code at address"));
        }
        let sel = selector(&call.data).ok_or_else(|| revert("empty calldata"))?;
        self.world.state.lock().unwrap().l1_sent.push(sel);

        if sel == id(EXECUTE_DEPOSIT_SIG) || sel == id(EXECUTE_WITHDRAW_SIG) {
            let landed = self.execute(&call.data)?;
            let mut state = self.world.state.lock().unwrap();
            if !std::mem::take(&mut state.race_next_execution) {
                return Ok(landed);
            }
            // the landed execution belongs to someone else; ours mines as a revert
            let ours = H256::from_low_u64_be(state.next_tx());
            let block = state.l1_block;
            state.receipts.insert(
                ours,
                TransactionReceipt {
                    transaction_hash: ours,
                    block_number: Some(U64::from(block)),
                    status: Some(U64::from(0)),
                    ..Default::default()
                },
            );
            Ok(ours)
        } else {
            Err(revert("unknown selector"))
        }
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        _timeout: Duration,
    ) -> BridgeResult<TransactionReceipt> {
        self.world
            .state
            .lock()
            .unwrap()
            .receipts
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| BridgeError::Timeout {
                operation: format!("receipt {:?}", tx_hash),
            })
            .and_then(|receipt| match receipt.status {
                Some(status) if status == U64::from(1) => Ok(receipt),
                _ => Err(BridgeError::Reverted(format!(
                    "transaction {:?} reverted",
                    tx_hash
                ))),
            })
    }

    async fn query_events(
        &self,
        contract: Address,
        topic0: H256,
        from_block: u64,
    ) -> BridgeResult<Vec<Log>> {
        let state = self.world.state.lock().unwrap();
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                log.address == contract
                    && log.topics.first() == Some(&topic0)
                    && log.block_number.map(|b| b.as_u64()).unwrap_or(0) >= from_block
            })
            .cloned()
            .collect())
    }

    async fn read_contract(&self, call: L1Call) -> BridgeResult<Bytes> {
        if selector(&call.data) != Some(id(INTENT_CONSUMED_SIG)) {
            return Err(revert("unknown view"));
        }
        let tokens = decode(&[ParamType::FixedBytes(32)], &call.data[4..])
            .map_err(|e| BridgeError::Encoding(e.to_string()))?;
        let intent_id = match &tokens[0] {
            Token::FixedBytes(bytes) => Fr::from_h256(&H256::from_slice(bytes))?,
            _ => return Err(BridgeError::Encoding("bad intentConsumed arg".into())),
        };
        let consumed = self.world.state.lock().unwrap().consumed.contains(&intent_id);
        Ok(encode(&[Token::Bool(consumed)]).into())
    }

    async fn get_block_number(&self) -> BridgeResult<u64> {
        Ok(self.world.state.lock().unwrap().l1_block)
    }

    async fn get_timestamp(&self) -> BridgeResult<u64> {
        Ok(self.world.state.lock().unwrap().l1_time)
    }
}

/// Rollup view of the world, acting as `World::caller`
pub struct SimL2 {
    world: World,
}

impl SimL2 {
    fn run(&self, state: &mut State, call: &L2Call) -> BridgeResult<()> {
        let caller = self.world.caller;
        if call.contract == self.world.program {
            return match call.function.as_str() {
                "request_deposit" => self.request_deposit(state, call, caller),
                "finalize_deposit" => self.finalize_deposit(state, call),
                "request_withdraw" => self.request_withdraw(state, call, caller),
                "finalize_withdraw" => self.finalize_withdraw(state, call),
                "cancel_deposit" => self.cancel_deposit(state, call, caller),
                "claim_refund" => self.claim_refund(state, call),
                other => Err(revert(&format!("unknown function {}", other))),
            };
        }
        if call.function == "claim_private" {
            return self.claim_private(state, call, caller);
        }
        Err(revert("unknown contract"))
    }

    fn intent_for(
        caller: Fr,
        asset: Address,
        amount: u128,
        decimals: u8,
        deadline: u64,
        secret_hash: Fr,
    ) -> Intent {
        let salt = hash(separators::INTENT_SALT, &[caller, secret_hash]);
        let intent_id = hash(
            separators::INTENT_ID,
            &[
                caller,
                Fr::from_address(&asset),
                Fr::from_u128(amount),
                Fr::from_u64(decimals as u64),
                Fr::from_u64(deadline),
                salt,
            ],
        );
        Intent {
            intent_id,
            owner_commitment: hash(separators::OWNER_COMMITMENT, &[caller]),
            asset,
            amount,
            original_decimals: decimals,
            deadline,
            salt,
            secret_hash,
        }
    }

    fn record_intent(state: &mut State, intent: Intent, kind: IntentKind, nonce: Fr, token: Fr) {
        let message = hash(separators::OUTBOUND_MESSAGE, &[intent.intent_id]);
        let leaf = state.outbox.len() as u64;
        state.outbox.insert(message, (state.l2_block, leaf));
        state.intents.insert(
            intent.intent_id,
            ProgramIntent {
                intent,
                kind,
                status: 1,
                request_block: state.l2_block,
                nonce,
                token,
            },
        );
    }

    fn request_deposit(&self, state: &mut State, call: &L2Call, caller: Fr) -> BridgeResult<()> {
        let asset = call.args[0].to_address()?;
        let gross = arg_u128(call, 1);
        let decimals = arg_u64(call, 2) as u8;
        let deadline = arg_u64(call, 3);
        let secret_hash = call.args[4];

        if deadline <= state.l2_time {
            return Err(revert("deadline passed"));
        }
        let token = *state
            .token_for_asset
            .get(&asset)
            .ok_or_else(|| revert("asset not listed"))?;
        let fee = gross * FEE_BPS / 10_000;
        let net = gross - fee;

        let balance = state.balance_mut(token, caller);
        if *balance < gross {
            return Err(revert("insufficient private balance"));
        }
        *balance -= gross;

        let intent = Self::intent_for(caller, asset, net, decimals, deadline, secret_hash);
        let intent_id = intent.intent_id;
        if state.intents.contains_key(&intent_id) {
            return Err(revert("intent already exists"));
        }
        Self::record_intent(state, intent, IntentKind::Deposit, intent_id, token);
        state.positions.insert(
            intent_id,
            SimPosition {
                status: 1,
                asset,
                shares: 0,
                net,
                decimals,
                deadline,
                intent_id,
                token,
            },
        );
        Ok(())
    }

    fn consume_message(state: &mut State, key: Fr, secret: Fr, leaf_index: u64) -> BridgeResult<u128> {
        if state.claimed.contains(&key) {
            return Err(revert("nullifier already consumed"));
        }
        let message = state
            .inbox
            .get(&key)
            .cloned()
            .ok_or_else(|| revert("message not in tree"))?;
        if state.hold_inbox || message.included_at > state.l2_block {
            return Err(revert("message not in tree"));
        }
        if message.leaf_index != leaf_index {
            return Err(revert("invalid leaf index"));
        }
        if hash(separators::SECRET_HASH, &[secret]) != message.secret_hash {
            return Err(revert("invalid secret"));
        }
        state.claimed.insert(key);
        Ok(message.amount)
    }

    fn finalize_deposit(&self, state: &mut State, call: &L2Call) -> BridgeResult<()> {
        let intent_id = call.args[0];
        let shares = arg_u128(call, 1);
        let secret = call.args[2];
        let leaf_index = arg_u64(call, 3);

        let intent = state
            .intents
            .get(&intent_id)
            .cloned()
            .ok_or_else(|| revert("unknown intent"))?;
        if intent.status != 1 || intent.kind != IntentKind::Deposit {
            return Err(revert("intent already consumed"));
        }
        let key = hash(DEPOSIT_MESSAGE_SEP, &[intent_id]);
        let carried = Self::consume_message(state, key, secret, leaf_index)?;
        if carried != shares {
            return Err(revert("share mismatch"));
        }

        if let Some(entry) = state.intents.get_mut(&intent_id) {
            entry.status = 2;
        }
        if let Some(position) = state.positions.get_mut(&intent_id) {
            position.status = 2;
            position.shares = shares;
        }
        Ok(())
    }

    fn request_withdraw(&self, state: &mut State, call: &L2Call, caller: Fr) -> BridgeResult<()> {
        let nonce = call.args[0];
        let deadline = arg_u64(call, 1);
        let secret_hash = call.args[2];

        if deadline <= state.l2_time {
            return Err(revert("deadline passed"));
        }
        let position = state
            .positions
            .get(&nonce)
            .cloned()
            .ok_or_else(|| revert("unknown position"))?;
        if position.status != 2 {
            return Err(revert("position not active"));
        }

        let intent = Self::intent_for(
            caller,
            position.asset,
            position.shares,
            position.decimals,
            deadline,
            secret_hash,
        );
        let intent_id = intent.intent_id;
        Self::record_intent(state, intent, IntentKind::Withdraw, nonce, position.token);
        if let Some(position) = state.positions.get_mut(&nonce) {
            position.status = 3;
            position.deadline = deadline;
            position.intent_id = intent_id;
        }
        Ok(())
    }

    fn finalize_withdraw(&self, state: &mut State, call: &L2Call) -> BridgeResult<()> {
        let intent_id = call.args[0];
        let intent = state
            .intents
            .get(&intent_id)
            .cloned()
            .ok_or_else(|| revert("unknown intent"))?;
        if intent.status != 1 || intent.kind != IntentKind::Withdraw {
            return Err(revert("intent already consumed"));
        }
        if !state.consumed.contains(&intent_id) {
            return Err(revert("withdrawal not executed on L1"));
        }

        if let Some(entry) = state.intents.get_mut(&intent_id) {
            entry.status = 2;
        }
        if let Some(position) = state.positions.get_mut(&intent.nonce) {
            position.status = 4;
        }
        Ok(())
    }

    fn cancel_deposit(&self, state: &mut State, call: &L2Call, caller: Fr) -> BridgeResult<()> {
        let intent_id = call.args[0];
        let now = arg_u64(call, 1);
        let net = arg_u128(call, 2);

        let position = state
            .positions
            .get(&intent_id)
            .cloned()
            .ok_or_else(|| revert("unknown position"))?;
        if position.status != 1 {
            return Err(revert("deposit not pending"));
        }
        if now > state.l2_time || now <= position.deadline {
            return Err(revert("deadline not passed"));
        }
        if state.consumed.contains(&intent_id) {
            return Err(revert("intent already consumed"));
        }
        if net != position.net {
            return Err(revert("net amount mismatch"));
        }

        *state.balance_mut(position.token, caller) += net;
        if let Some(entry) = state.intents.get_mut(&intent_id) {
            entry.status = 3;
        }
        if let Some(position) = state.positions.get_mut(&intent_id) {
            position.status = 5;
        }
        Ok(())
    }

    fn claim_refund(&self, state: &mut State, call: &L2Call) -> BridgeResult<()> {
        let nonce = call.args[0];
        let now = arg_u64(call, 1);

        let position = state
            .positions
            .get(&nonce)
            .cloned()
            .ok_or_else(|| revert("unknown position"))?;
        if position.status != 3 {
            return Err(revert("no pending withdrawal"));
        }
        if now > state.l2_time || now <= position.deadline {
            return Err(revert("deadline not passed"));
        }
        if state.consumed.contains(&position.intent_id) {
            return Err(revert("intent already consumed"));
        }

        if let Some(entry) = state.intents.get_mut(&position.intent_id) {
            entry.status = 3;
        }
        if let Some(old) = state.positions.get_mut(&nonce) {
            old.status = 5;
        }
        let refund_nonce = hash(separators::REFUND_NONCE, &[nonce]);
        state.positions.insert(
            refund_nonce,
            SimPosition {
                status: 2,
                deadline: 0,
                intent_id: Fr::ZERO,
                ..position
            },
        );
        Ok(())
    }

    fn claim_private(&self, state: &mut State, call: &L2Call, caller: Fr) -> BridgeResult<()> {
        let amount = arg_u128(call, 0);
        let secret = call.args[1];
        let leaf_index = arg_u64(call, 2);

        let secret_hash = hash(separators::SECRET_HASH, &[secret]);
        let key = state
            .inbox
            .iter()
            .find(|(_, m)| m.secret_hash == secret_hash && m.leaf_index == leaf_index)
            .map(|(key, _)| *key)
            .ok_or_else(|| revert("message not in tree"))?;
        let carried = Self::consume_message(state, key, secret, leaf_index)?;
        if carried != amount {
            return Err(revert("amount mismatch"));
        }
        *state.balance_mut(call.contract, caller) += amount;
        Ok(())
    }
}

#[async_trait]
impl MessageSource for SimL2 {
    async fn get_block_number(&self) -> BridgeResult<u64> {
        let mut state = self.world.state.lock().unwrap();
        state.l2_block += 1;
        Ok(state.l2_block)
    }

    async fn is_message_included(&self, message_key: &Fr) -> BridgeResult<Option<u64>> {
        let state = self.world.state.lock().unwrap();
        if state.hold_inbox {
            return Ok(None);
        }
        Ok(state.inbox.get(message_key).map(|m| m.included_at))
    }

    async fn get_inclusion_witness(
        &self,
        at_block: u64,
        message_key: &Fr,
    ) -> BridgeResult<Option<InclusionWitness>> {
        let state = self.world.state.lock().unwrap();
        if state.hold_inbox {
            return Ok(None);
        }
        Ok(state
            .inbox
            .get(message_key)
            .filter(|m| m.included_at <= at_block)
            .map(|m| InclusionWitness {
                leaf_index: m.leaf_index,
                sibling_path: vec![*message_key],
            }))
    }

    async fn get_outbox_witness(
        &self,
        l2_block: u64,
        message: &Fr,
    ) -> BridgeResult<Option<InclusionWitness>> {
        let state = self.world.state.lock().unwrap();
        if state.hold_outbox {
            return Ok(None);
        }
        Ok(state
            .outbox
            .get(message)
            .filter(|(block, _)| *block == l2_block)
            .map(|(_, leaf)| InclusionWitness {
                leaf_index: *leaf,
                sibling_path: vec![*message],
            }))
    }
}

#[async_trait]
impl L2Client for SimL2 {
    async fn submit_transaction(&self, call: L2Call) -> BridgeResult<String> {
        let mut state = self.world.state.lock().unwrap();
        if std::mem::take(&mut state.drop_next_submission) {
            return Err(BridgeError::Network("connection reset".into()));
        }
        state.l2_block += 1;
        self.run(&mut state, &call)?;

        let tx_hash = format!("0x{:064x}", state.next_tx());
        let block_number = state.l2_block;
        state.l2_submitted.push(call.function.clone());
        state.l2_receipts.insert(
            tx_hash.clone(),
            L2TxReceipt {
                tx_hash: tx_hash.clone(),
                block_number,
            },
        );
        Ok(tx_hash)
    }

    async fn wait_for_inclusion(
        &self,
        tx_hash: &str,
        _timeout: Duration,
    ) -> BridgeResult<L2TxReceipt> {
        self.world
            .state
            .lock()
            .unwrap()
            .l2_receipts
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| BridgeError::Timeout {
                operation: format!("L2 tx {}", tx_hash),
            })
    }

    async fn simulate_view(&self, call: L2Call) -> BridgeResult<Vec<Fr>> {
        let state = self.world.state.lock().unwrap();
        match call.function.as_str() {
            "get_intent" => Ok(match state.intents.get(&call.args[0]) {
                Some(intent) => vec![
                    Fr::from_u64(intent.status),
                    Fr::from_u64(intent.request_block),
                ],
                None => vec![Fr::ZERO, Fr::ZERO],
            }),
            "get_position" => Ok(match state.positions.get(&call.args[0]) {
                Some(p) => vec![
                    Fr::from_u64(p.status),
                    Fr::from_address(&p.asset),
                    Fr::from_u128(p.shares),
                    Fr::from_u128(p.net),
                    Fr::from_u64(p.decimals as u64),
                    Fr::from_u64(p.deadline),
                    p.intent_id,
                ],
                None => vec![Fr::ZERO; 7],
            }),
            "balance_of_private" => Ok(vec![Fr::from_u128(
                state
                    .balances
                    .get(&(call.contract, call.args[0]))
                    .copied()
                    .unwrap_or(0),
            )]),
            "is_claimed" => Ok(vec![Fr::from_u64(
                state.claimed.contains(&call.args[0]) as u64,
            )]),
            other => Err(revert(&format!("unknown view {}", other))),
        }
    }

    async fn get_timestamp(&self) -> BridgeResult<u64> {
        Ok(self.world.state.lock().unwrap().l2_time)
    }
}
