//! Per-player resource accounts
//!
//! Every player owns one account holding two balances (minerals and energy).
//! Mutations go through `credit` and `debit`; a debit that would overdraw
//! fails and leaves the account untouched. Successful mutations mark the
//! account dirty so the tick broadcast can fold any number of changes into
//! a single resource update per player per tick.

use shared::MAX_PLAYERS;

pub const START_MINERALS: u32 = 200;
pub const START_ENERGY: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Minerals,
    Energy,
}

#[derive(Debug, Clone, Copy)]
struct Account {
    minerals: u32,
    energy: u32,
    needs_flush: bool,
}

impl Account {
    fn new() -> Self {
        // Dirty from the start so the opening broadcast carries the
        // initial balances without a special case.
        Self {
            minerals: START_MINERALS,
            energy: START_ENERGY,
            needs_flush: true,
        }
    }

    fn balance_mut(&mut self, resource: Resource) -> &mut u32 {
        match resource {
            Resource::Minerals => &mut self.minerals,
            Resource::Energy => &mut self.energy,
        }
    }
}

pub struct ResourceLedger {
    accounts: Vec<Account>,
}

impl ResourceLedger {
    pub fn new(players: usize) -> Self {
        assert!(players <= MAX_PLAYERS);
        Self {
            accounts: vec![Account::new(); players],
        }
    }

    pub fn balance(&self, slot: usize, resource: Resource) -> u32 {
        match resource {
            Resource::Minerals => self.accounts[slot].minerals,
            Resource::Energy => self.accounts[slot].energy,
        }
    }

    pub fn credit(&mut self, slot: usize, resource: Resource, amount: u32) {
        if amount == 0 {
            return;
        }
        let account = &mut self.accounts[slot];
        let balance = account.balance_mut(resource);
        *balance = balance.saturating_add(amount);
        account.needs_flush = true;
    }

    /// Withdraws `amount`, or returns false without touching the account
    /// when the balance cannot cover it.
    pub fn debit(&mut self, slot: usize, resource: Resource, amount: u32) -> bool {
        if amount == 0 {
            return true;
        }
        let account = &mut self.accounts[slot];
        let balance = account.balance_mut(resource);
        if *balance < amount {
            return false;
        }
        *balance -= amount;
        account.needs_flush = true;
        true
    }

    /// Withdraws a mineral and energy price together; either both debits
    /// land or neither does.
    pub fn debit_cost(&mut self, slot: usize, minerals: u32, energy: u32) -> bool {
        let account = &mut self.accounts[slot];
        if account.minerals < minerals || account.energy < energy {
            return false;
        }
        account.minerals -= minerals;
        account.energy -= energy;
        account.needs_flush = true;
        true
    }

    /// Returns `(slot, minerals, energy)` for every account touched since
    /// the last call and clears the flags.
    pub fn take_dirty(&mut self) -> Vec<(usize, u32, u32)> {
        let mut dirty = Vec::new();
        for (slot, account) in self.accounts.iter_mut().enumerate() {
            if account.needs_flush {
                account.needs_flush = false;
                dirty.push((slot, account.minerals, account.energy));
            }
        }
        dirty
    }

    #[cfg(test)]
    fn is_dirty(&self, slot: usize) -> bool {
        self.accounts[slot].needs_flush
    }
}
