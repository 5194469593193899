//! This module contains the world state store: the accounts, their balances,
//! code and storage, as seen by one execution path.
//!
//! # Versions
//!
//! A [`WorldState`] is an immutable version. Every mutator returns a new
//! version that records the one it was derived from as its parent, so the
//! versions reachable from one transaction form a DAG rooted at the state the
//! transaction started from. Only the account being written is copied; all
//! other accounts stay shared between the parent and the child.

pub mod account;

use std::{
    collections::BTreeMap,
    fmt::{Debug, Display, Formatter},
    str::FromStr,
    sync::Arc,
};

use ethnum::U256;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use uuid::Uuid;

pub use account::{Account, Storage};

use crate::{
    constant::ADDRESS_WIDTH_BITS,
    disassembly::Program,
    error::expression::Result,
    expr::{word::mask, Operator, SymbolicValue},
};

/// An account address.
///
/// Addresses are always concrete. A path that would have to act on a
/// symbolic address ends with an exception instead.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Address(U256);

impl Address {
    /// Constructs an address from `value`, truncated to 160 bits.
    #[must_use]
    pub fn new(value: impl Into<U256>) -> Self {
        Self(value.into() & mask(ADDRESS_WIDTH_BITS))
    }

    /// Constructs an address from its 20 big-endian bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        let mut buffer = [0u8; 32];
        buffer[12..].copy_from_slice(&bytes);
        Self(U256::from_be_bytes(buffer))
    }

    /// Gets the address of the account a stack value refers to, if the value
    /// is concrete.
    #[must_use]
    pub fn from_value(value: &SymbolicValue) -> Option<Self> {
        value.as_concrete().map(Self::new)
    }

    /// Gets the numeric value of the address.
    #[must_use]
    pub fn value(&self) -> U256 {
        self.0
    }

    /// Gets the address as a concrete word.
    #[must_use]
    pub fn as_word(&self) -> SymbolicValue {
        SymbolicValue::word(self.0)
    }

    /// Gets the 20 big-endian bytes of the address.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&self.0.to_be_bytes()[12..]);
        bytes
    }

    /// Computes the address of a contract created with `CREATE` by `self`
    /// when its nonce was `nonce`.
    ///
    /// This is `keccak256(rlp([sender, nonce]))[12..]`.
    #[must_use]
    pub fn create(&self, nonce: u64) -> Self {
        let mut payload = Vec::with_capacity(1 + 20 + 9);
        payload.push(0x80 + 20);
        payload.extend_from_slice(&self.to_bytes());
        if nonce == 0 {
            payload.push(0x80);
        } else if nonce < 0x80 {
            payload.push(nonce.to_be_bytes()[7]);
        } else {
            let bytes = nonce.to_be_bytes();
            let first = bytes.iter().position(|b| *b != 0).unwrap_or(7);
            payload.push(0x80 + u8::try_from(8 - first).unwrap_or(8));
            payload.extend_from_slice(&bytes[first..]);
        }

        let mut list = Vec::with_capacity(1 + payload.len());
        list.push(0xc0 + u8::try_from(payload.len()).unwrap_or(55));
        list.extend_from_slice(&payload);
        Self::from_hash(&list)
    }

    /// Computes the address of a contract created with `CREATE2` by `self`
    /// with `salt` and the code `init_code`.
    ///
    /// This is `keccak256(0xff ++ sender ++ salt ++ keccak256(init_code))[12..]`.
    #[must_use]
    pub fn create2(&self, salt: [u8; 32], init_code: &[u8]) -> Self {
        let mut buffer = Vec::with_capacity(1 + 20 + 32 + 32);
        buffer.push(0xff);
        buffer.extend_from_slice(&self.to_bytes());
        buffer.extend_from_slice(&salt);
        buffer.extend_from_slice(&Keccak256::digest(init_code));
        Self::from_hash(&buffer)
    }

    fn from_hash(preimage: &[u8]) -> Self {
        let hash = Keccak256::digest(preimage);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[12..]);
        Self::from_bytes(bytes)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_bytes()))
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(stripped, &mut bytes)?;
        Ok(Self::from_bytes(bytes))
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

/// The identifier of one version of the world state.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VersionId(Uuid);

impl VersionId {
    fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for VersionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// The result of moving value between two accounts.
#[derive(Clone, Debug)]
pub struct Transfer {
    /// The world after the transfer.
    pub world: WorldState,

    /// The condition `balance(from) >= amount` under which the transfer is
    /// valid.
    ///
    /// It is not asserted anywhere. The caller decides whether it holds,
    /// forking if it is symbolic.
    pub obligation: SymbolicValue,
}

/// One version of the state of every account.
#[derive(Clone, Debug)]
pub struct WorldState {
    accounts:    Arc<BTreeMap<Address, Arc<Account>>>,
    constraints: Arc<Vec<SymbolicValue>>,
    version:     VersionId,
    parent:      Option<VersionId>,
}

impl WorldState {
    /// Constructs an empty world with no accounts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            accounts:    Arc::new(BTreeMap::new()),
            constraints: Arc::new(Vec::new()),
            version:     VersionId::fresh(),
            parent:      None,
        }
    }

    /// Gets the identifier of this version.
    #[must_use]
    pub fn version(&self) -> VersionId {
        self.version
    }

    /// Gets the identifier of the version this one was derived from.
    #[must_use]
    pub fn parent(&self) -> Option<VersionId> {
        self.parent
    }

    /// Gets the account at `address`, if it exists.
    #[must_use]
    pub fn account(&self, address: Address) -> Option<&Arc<Account>> {
        self.accounts.get(&address)
    }

    /// Checks if an account exists at `address`.
    #[must_use]
    pub fn contains(&self, address: Address) -> bool {
        self.accounts.contains_key(&address)
    }

    /// Iterates over the addresses of all accounts.
    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.accounts.keys().copied()
    }

    /// Gets the constraints that hold on every path through this world,
    /// independent of any branch taken.
    #[must_use]
    pub fn constraints(&self) -> &[SymbolicValue] {
        &self.constraints
    }

    /// Gets the balance of the account at `address`, which is zero for
    /// accounts that do not exist.
    #[must_use]
    pub fn balance(&self, address: Address) -> SymbolicValue {
        self.account(address)
            .map_or_else(|| SymbolicValue::word(0u8), |a| a.balance.clone())
    }

    /// Gets the code of the account at `address`, which is empty for accounts
    /// that do not exist.
    #[must_use]
    pub fn code(&self, address: Address) -> Arc<Program> {
        self.account(address)
            .map_or_else(|| Arc::new(Program::empty()), |a| a.code.clone())
    }

    /// Gets the nonce of the account at `address`.
    #[must_use]
    pub fn nonce(&self, address: Address) -> u64 {
        self.account(address).map_or(0, |a| a.nonce)
    }

    /// Reads the storage of `address` at `key`.
    ///
    /// # Errors
    ///
    /// If the key is not a word.
    pub fn read_storage(&self, address: Address, key: &SymbolicValue) -> Result<SymbolicValue> {
        match self.account(address) {
            Some(account) => account.storage.read(key),
            None => Ok(SymbolicValue::word(0u8)),
        }
    }

    /// Writes `value` to the storage of `address` at `key`.
    #[must_use]
    pub fn write_storage(&self, address: Address, key: SymbolicValue, value: SymbolicValue) -> Self {
        self.update(address, |account| {
            account.storage = account.storage.write(key, value);
        })
    }

    /// Creates the account at `address` with `balance`, replacing any account
    /// already there.
    #[must_use]
    pub fn create_account(&self, address: Address, balance: SymbolicValue) -> Self {
        let mut accounts = (*self.accounts).clone();
        accounts.insert(address, Arc::new(Account::new(balance)));
        self.derive(accounts, self.constraints.clone())
    }

    /// Sets the code of the account at `address`, creating the account if
    /// needed.
    #[must_use]
    pub fn deploy_code(&self, address: Address, code: Arc<Program>) -> Self {
        self.update(address, |account| account.code = code)
    }

    /// Increments the nonce of the account at `address`.
    #[must_use]
    pub fn increment_nonce(&self, address: Address) -> Self {
        self.update(address, |account| account.nonce = account.nonce.saturating_add(1))
    }

    /// Sets the balance of the account at `address`.
    #[must_use]
    pub fn set_balance(&self, address: Address, balance: SymbolicValue) -> Self {
        self.update(address, |account| account.balance = balance)
    }

    /// Moves `amount` from `from` to `to`.
    ///
    /// The returned world has the balances updated with wrapping arithmetic.
    /// It only describes a valid world under the returned obligation.
    ///
    /// # Errors
    ///
    /// If `amount` is not a word.
    pub fn transfer(&self, from: Address, to: Address, amount: &SymbolicValue) -> Result<Transfer> {
        let from_balance = self.balance(from);
        let obligation =
            SymbolicValue::apply(Operator::Uge, vec![from_balance.clone(), amount.clone()])?;
        if amount.as_concrete() == Some(U256::ZERO) || from == to {
            return Ok(Transfer {
                world: self.clone(),
                obligation,
            });
        }

        let debited = SymbolicValue::apply(Operator::Sub, vec![from_balance, amount.clone()])?;
        let world = self.set_balance(from, debited);
        let credited = SymbolicValue::apply(Operator::Add, vec![world.balance(to), amount.clone()])?;
        let world = world.set_balance(to, credited);
        Ok(Transfer {
            world: world.reparent(self),
            obligation,
        })
    }

    /// Destroys the account at `address`, moving its balance to
    /// `beneficiary`.
    ///
    /// # Errors
    ///
    /// If the balances cannot be added.
    pub fn destroy(&self, address: Address, beneficiary: Address) -> Result<Self> {
        let balance = self.balance(address);
        let world = if beneficiary == address {
            self.clone()
        } else {
            let credited =
                SymbolicValue::apply(Operator::Add, vec![self.balance(beneficiary), balance])?;
            self.set_balance(beneficiary, credited)
        };
        let mut accounts = (*world.accounts).clone();
        accounts.remove(&address);
        Ok(self.derive(accounts, self.constraints.clone()))
    }

    /// Adds a constraint that holds in this world independently of the path
    /// taken through it.
    ///
    /// # Errors
    ///
    /// If the constraint cannot be read as a predicate.
    pub fn with_constraint(&self, constraint: SymbolicValue) -> Result<Self> {
        let mut constraints = (*self.constraints).clone();
        constraints.push(constraint.truthy()?);
        Ok(self.derive_shared(self.accounts.clone(), Arc::new(constraints)))
    }

    /// Applies `change` to a copy of the account at `address`, which is
    /// created empty if it does not yet exist.
    fn update(&self, address: Address, change: impl FnOnce(&mut Account)) -> Self {
        let mut account = self
            .account(address)
            .map_or_else(|| Account::new(SymbolicValue::word(0u8)), |a| (**a).clone());
        change(&mut account);
        let mut accounts = (*self.accounts).clone();
        accounts.insert(address, Arc::new(account));
        self.derive(accounts, self.constraints.clone())
    }

    fn derive(
        &self,
        accounts: BTreeMap<Address, Arc<Account>>,
        constraints: Arc<Vec<SymbolicValue>>,
    ) -> Self {
        self.derive_shared(Arc::new(accounts), constraints)
    }

    fn derive_shared(
        &self,
        accounts: Arc<BTreeMap<Address, Arc<Account>>>,
        constraints: Arc<Vec<SymbolicValue>>,
    ) -> Self {
        Self {
            accounts,
            constraints,
            version: VersionId::fresh(),
            parent: Some(self.version),
        }
    }

    /// Makes `ancestor` the direct parent of `self`, collapsing the
    /// intermediate versions of a compound update.
    fn reparent(self, ancestor: &Self) -> Self {
        Self {
            parent: Some(ancestor.version),
            ..self
        }
    }
}

impl Default for WorldState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use ethnum::U256;

    use crate::{
        expr::SymbolicValue,
        world::{Address, WorldState},
    };

    #[test]
    fn writes_produce_child_versions() {
        let alice = Address::from(1);
        let root = WorldState::new().create_account(alice, SymbolicValue::word(10u8));
        let child = root.write_storage(alice, SymbolicValue::word(0u8), SymbolicValue::word(5u8));

        assert_eq!(child.parent(), Some(root.version()));
        assert_ne!(child.version(), root.version());
        assert!(root.account(alice).unwrap().storage().is_empty());
        assert_eq!(child.account(alice).unwrap().storage().len(), 1);
    }

    #[test]
    fn untouched_accounts_are_shared() {
        let alice = Address::from(1);
        let bob = Address::from(2);
        let root = WorldState::new()
            .create_account(alice, SymbolicValue::word(10u8))
            .create_account(bob, SymbolicValue::word(10u8));
        let child = root.write_storage(alice, SymbolicValue::word(0u8), SymbolicValue::word(5u8));

        assert!(Arc::ptr_eq(root.account(bob).unwrap(), child.account(bob).unwrap()));
        assert!(!Arc::ptr_eq(root.account(alice).unwrap(), child.account(alice).unwrap()));
    }

    #[test]
    fn transfers_return_their_obligation() -> anyhow::Result<()> {
        let alice = Address::from(1);
        let bob = Address::from(2);
        let root = WorldState::new()
            .create_account(alice, SymbolicValue::word(10u8))
            .create_account(bob, SymbolicValue::word(0u8));

        let affordable = root.transfer(alice, bob, &SymbolicValue::word(4u8))?;
        assert_eq!(affordable.obligation.as_bool(), Some(true));
        assert_eq!(affordable.world.balance(alice).as_concrete(), Some(U256::from(6u8)));
        assert_eq!(affordable.world.balance(bob).as_concrete(), Some(U256::from(4u8)));
        assert_eq!(affordable.world.parent(), Some(root.version()));

        let too_much = root.transfer(alice, bob, &SymbolicValue::word(11u8))?;
        assert_eq!(too_much.obligation.as_bool(), Some(false));

        let amount = SymbolicValue::fresh_symbol(256, "amount");
        let symbolic = root.transfer(alice, bob, &amount)?;
        assert!(symbolic.obligation.as_bool().is_none());

        Ok(())
    }

    #[test]
    fn derives_creation_addresses() -> anyhow::Result<()> {
        // The well-known first contract address of this deployer.
        let deployer: Address = "0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0".parse()?;
        let expected: Address = "0xcd234a471b72ba2f1ccf0a70fcaba648a5eecd8d".parse()?;
        assert_eq!(deployer.create(0), expected);

        // The first example from EIP-1014.
        let zero = Address::default();
        let expected: Address = "0x4d1a2e2bb4f88f0250f26ffff098b0b30b26bf38".parse()?;
        assert_eq!(zero.create2([0; 32], &[0x00]), expected);

        Ok(())
    }

    #[test]
    fn addresses_display_as_hex() -> anyhow::Result<()> {
        let address = Address::from(0xabcd);
        assert_eq!(address.to_string(), "0x000000000000000000000000000000000000abcd");
        let json = serde_json::to_string(&address)?;
        assert_eq!(serde_json::from_str::<Address>(&json)?, address);

        Ok(())
    }

    #[test]
    fn destroying_moves_the_balance() -> anyhow::Result<()> {
        let alice = Address::from(1);
        let bob = Address::from(2);
        let root = WorldState::new()
            .create_account(alice, SymbolicValue::word(10u8))
            .create_account(bob, SymbolicValue::word(1u8));

        let world = root.destroy(alice, bob)?;
        assert!(!world.contains(alice));
        assert_eq!(world.balance(bob).as_concrete(), Some(U256::from(11u8)));

        Ok(())
    }
}
