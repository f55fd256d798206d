use crate::graph::{Graph, Node};
use core::fmt::{self, Display, Formatter};

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Individual(member) => write!(
                f,
                "{} @{}",
                member.semantics().name(),
                member.position()
            ),
            Self::Batch(members) => {
                f.write_str("batch [")?;
                for (idx, member) in members.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} @{}", member.semantics().name(), member.position())?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Human-readable dump: nodes, current roots and counters, then the link
/// table with `.` for none, `w` for weak and `S` for strong.
impl Display for Graph {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // Copy the counters out so the lock is not held while formatting.
        let (in_degree, roots, seen, remaining, first_root) = match self.state.lock() {
            Ok(state) => (
                state.in_degree.clone(),
                state.roots.clone(),
                state.seen.clone(),
                state.remaining,
                state.first_root,
            ),
            Err(_) => return writeln!(f, "graph state poisoned"),
        };

        writeln!(
            f,
            "graph: {} nodes, {} chain positions, weight {}, max_roots {}",
            self.nodes.len(),
            self.chain_len,
            self.weight,
            self.max_roots
        )?;
        for (idx, node) in self.nodes.iter().enumerate() {
            writeln!(f, "  {idx:>3}: {node} (weight {})", node.weight())?;
        }

        f.write_str("roots:")?;
        for (idx, _) in roots.iter().enumerate().filter(|&(_, &ready)| ready) {
            write!(f, " {idx}")?;
        }
        f.write_str("\nseen: ")?;
        for &flag in &seen {
            f.write_str(if flag { "1" } else { "0" })?;
        }
        f.write_str("\nin_degree:")?;
        for degree in &in_degree {
            write!(f, " {degree}")?;
        }
        match first_root {
            Some(root) => writeln!(f, "\nremaining: {remaining}, first_root: {root}")?,
            None => writeln!(f, "\nremaining: {remaining}, first_root: none")?,
        }

        f.write_str("table:\n")?;
        for row in 0..self.table.side() {
            f.write_str("  ")?;
            for link in self.table.row(row) {
                write!(f, "{link}")?;
            }
            f.write_str("\n")?;
        }
        Ok(())
    }
}
