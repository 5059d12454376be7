use sweep_common::InvalidReason;

/// Stats from one sweep run.
#[derive(Debug, Default)]
pub struct SweepStats {
    pub accounts_enumerated: u32,
    pub unreadable_rows: u32,
    pub already_classified: u32,
    pub classified: u32,
    pub profile_checks: u32,
    pub invalid_found: u32,
    pub by_reason: [u32; 5], // Default, Missing, Not found, Banned, No content
    pub audit_rows: u32,
    pub eligible: u32,
    pub attempted: u32,
    pub unfollowed: u32,
    pub dry_run: u32,
    pub skipped: u32,
    pub lifetime_unfollowed: u32,
}

impl SweepStats {
    pub fn record_invalid(&mut self, reason: InvalidReason) {
        self.invalid_found += 1;
        let slot = match reason {
            InvalidReason::DefaultUsername => 0,
            InvalidReason::MissingUsername => 1,
            InvalidReason::AccountNotFound => 2,
            InvalidReason::BannedAccount => 3,
            InvalidReason::NoContent => 4,
        };
        self.by_reason[slot] += 1;
    }
}

impl std::fmt::Display for SweepStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Sweep Run Complete ===")?;
        writeln!(f, "Accounts enumerated: {}", self.accounts_enumerated)?;
        writeln!(f, "Unreadable rows:     {}", self.unreadable_rows)?;
        writeln!(f, "Already classified:  {}", self.already_classified)?;
        writeln!(f, "Classified now:      {}", self.classified)?;
        writeln!(f, "Profile checks:      {}", self.profile_checks)?;
        writeln!(f, "Invalid found:       {}", self.invalid_found)?;
        if self.invalid_found > 0 {
            writeln!(f, "\nBy reason:")?;
            writeln!(f, "  Default username:  {}", self.by_reason[0])?;
            writeln!(f, "  Missing username:  {}", self.by_reason[1])?;
            writeln!(f, "  Account not found: {}", self.by_reason[2])?;
            writeln!(f, "  Banned account:    {}", self.by_reason[3])?;
            writeln!(f, "  No content:        {}", self.by_reason[4])?;
            writeln!(f, "  Audit rows:        {}", self.audit_rows)?;
        }
        writeln!(f, "\nRemediation:")?;
        writeln!(f, "  Eligible:   {}", self.eligible)?;
        writeln!(f, "  Attempted:  {}", self.attempted)?;
        writeln!(f, "  Unfollowed: {}", self.unfollowed)?;
        if self.dry_run > 0 {
            writeln!(f, "  Dry run:    {}", self.dry_run)?;
        }
        writeln!(f, "  Skipped:    {}", self.skipped)?;
        writeln!(f, "Lifetime unfollowed: {}", self.lifetime_unfollowed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_reasons_are_tallied() {
        let mut stats = SweepStats::default();
        stats.record_invalid(InvalidReason::NoContent);
        stats.record_invalid(InvalidReason::NoContent);
        stats.record_invalid(InvalidReason::DefaultUsername);
        assert_eq!(stats.invalid_found, 3);
        assert_eq!(stats.by_reason, [1, 0, 0, 0, 2]);
    }

    #[test]
    fn display_omits_reason_breakdown_when_nothing_found() {
        let rendered = SweepStats::default().to_string();
        assert!(rendered.contains("=== Sweep Run Complete ==="));
        assert!(!rendered.contains("By reason:"));
    }
}
