use std::{cell::Cell, rc::Rc};

use crate::error::{Result, TokenError};

/// Non-reentrancy flag shared by every guarded entry point of one token.
///
/// [`enter`](Self::enter) hands out an [`Entered`] capability; the flag stays
/// set until that value is dropped, on success and error paths alike. The
/// capability holds its own handle to the flag, so the token itself stays
/// free to be lent to an outgoing call while the flag is held.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    entered: Rc<Cell<bool>>,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> Result<Entered> {
        if self.entered.replace(true) {
            tracing::warn!("reentrant call rejected");
            return Err(TokenError::Reentrant);
        }
        Ok(Entered {
            flag: Rc::clone(&self.entered),
        })
    }

    pub fn is_entered(&self) -> bool {
        self.entered.get()
    }
}

#[must_use = "the guard is released as soon as this value is dropped"]
#[derive(Debug)]
pub struct Entered {
    flag: Rc<Cell<bool>>,
}

impl Drop for Entered {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}
