//! Bounded variable-name allocation for one expression.
//!
//! Names come from fixed slot tables; a pool that runs dry is an error rather
//! than wrapping around into names already in use.

use hashbrown::HashSet;

use crate::error::DriverError;

/// Which slot table a name is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarPool {
    /// Source reads: `a`..`z`, then `aa`..`zz`.
    General,
    /// Adjuster sliders wrapping the whole expression.
    Multiplier,
    /// Reference to the next overflow level.
    Rest,
}

impl VarPool {
    fn as_str(&self) -> &'static str {
        match self {
            VarPool::General => "general",
            VarPool::Multiplier => "multiplier",
            VarPool::Rest => "rest",
        }
    }
}

const MULTIPLIER_NAMES: [&str; 7] = ["M", "K", "L", "N", "O", "P", "Q"];
pub const REST_NAME: &str = "R";
/// Two-letter names the host's expression language reserves.
const KEYWORDS: [&str; 5] = ["as", "if", "in", "is", "or"];

fn general_slot(index: usize) -> String {
    if index < 26 {
        return ((b'a' + index as u8) as char).to_string();
    }
    let i = index - 26;
    let first = (b'a' + (i / 26) as u8) as char;
    let second = (b'a' + (i % 26) as u8) as char;
    format!("{first}{second}")
}

#[derive(Debug)]
pub struct VarNamespace {
    channel: String,
    two_letter: bool,
    taken: HashSet<String>,
    cursors: [usize; 3],
}

impl VarNamespace {
    pub fn for_channel(channel: impl Into<String>, two_letter: bool) -> Self {
        Self {
            channel: channel.into(),
            two_letter,
            taken: HashSet::new(),
            cursors: [0; 3],
        }
    }

    /// Mark a name as used (bindings carried over from an existing expression).
    pub fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_string());
    }

    pub fn is_taken(&self, name: &str) -> bool {
        self.taken.contains(name)
    }

    pub fn capacity(&self, pool: VarPool) -> usize {
        match pool {
            VarPool::General if self.two_letter => 26 + 26 * 26,
            VarPool::General => 26,
            VarPool::Multiplier => MULTIPLIER_NAMES.len(),
            VarPool::Rest => 1,
        }
    }

    fn slot(pool: VarPool, index: usize) -> String {
        match pool {
            VarPool::General => general_slot(index),
            VarPool::Multiplier => MULTIPLIER_NAMES[index].to_string(),
            VarPool::Rest => REST_NAME.to_string(),
        }
    }

    pub fn alloc(&mut self, pool: VarPool) -> Result<String, DriverError> {
        let capacity = self.capacity(pool);
        let cursor = &mut self.cursors[pool as usize];
        while *cursor < capacity {
            let name = Self::slot(pool, *cursor);
            *cursor += 1;
            if KEYWORDS.contains(&name.as_str()) || self.taken.contains(&name) {
                continue;
            }
            self.taken.insert(name.clone());
            return Ok(name);
        }
        Err(DriverError::NamespaceExhausted {
            channel: self.channel.clone(),
            pool: pool.as_str().to_string(),
            capacity,
        })
    }
}
