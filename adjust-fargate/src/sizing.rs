//! Task sizes that Fargate accepts.

use adjust_driver::error::Failure;

enum Memory {
    Choices(&'static [u64]),
    /// `min..=max` in increments of `step`
    Range(u64, u64, u64),
}

/// Memory in MiB allowed per CPU size.
const TASK_SIZES: &[(u64, Memory)] = &[
    (256, Memory::Choices(&[512, 1024, 2048])),
    (512, Memory::Range(1024, 4096, 1024)),
    (1024, Memory::Range(2048, 8192, 1024)),
    (2048, Memory::Range(4096, 16384, 1024)),
    (4096, Memory::Range(8192, 30720, 1024)),
    (8192, Memory::Range(16384, 61440, 4096)),
    (16384, Memory::Range(32768, 122880, 8192)),
];

pub fn cpu_sizes() -> impl Iterator<Item = u64> {
    TASK_SIZES.iter().map(|(cpu, _)| *cpu)
}

/// Memory sizes allowed with `cpu` units, smallest first; empty if `cpu` is
/// not a Fargate size.
pub fn memory_sizes(cpu: u64) -> Vec<u64> {
    match TASK_SIZES.iter().find(|(c, _)| *c == cpu) {
        Some((_, Memory::Choices(choices))) => choices.to_vec(),
        Some((_, Memory::Range(min, max, step))) => (*min..=*max).step_by(*step as usize).collect(),
        None => Vec::new(),
    }
}

pub fn check(cpu: u64, memory: u64) -> Result<(), Failure> {
    let allowed = memory_sizes(cpu);
    if allowed.is_empty() {
        return Err(Failure::Rejected(format!(
            "{} CPU units is not a Fargate task size; use one of {}",
            cpu,
            cpu_sizes()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    if !allowed.contains(&memory) {
        return Err(Failure::Rejected(format!(
            "{} MiB of memory is not allowed with {} CPU units on Fargate (allowed: {} to {} MiB)",
            memory,
            cpu,
            allowed[0],
            allowed[allowed.len() - 1]
        )));
    }
    Ok(())
}
