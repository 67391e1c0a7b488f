//! Exception region structure checks and protected-flow rules.
//!
//! Validates the try/catch/filter/finally/fault clause set of a method body
//! (bounds, disjointness, proper nesting), seeds the fixed entry stacks of
//! region anchors, and answers the control-transfer legality questions the
//! abstract interpreter asks: where `leave` may go, which branches may cross
//! region boundaries, and which fallthroughs are tolerated.

use crate::{
    metadata::{ExceptionRegion, RegionKind, TypeOracle, WellKnown},
    verifier::{
        block::BlockMap,
        errors::{VerifierErrorKind, VerifierFailure},
        slot::StackSlot,
    },
    Error, Result,
};

fn region_failure(kind: VerifierErrorKind, offset: u32) -> Error {
    Error::Verification(VerifierFailure::new(kind, offset))
}

/// Code intervals owned by one region: try, handler, and (for filters) the
/// filter expression. Half-open `[start, end)`.
fn intervals(region: &ExceptionRegion) -> Vec<(u32, u32)> {
    let mut ranges = vec![
        (region.try_offset, region.try_end()),
        (region.handler_offset, region.handler_end()),
    ];
    if let Some(filter_offset) = region.filter_offset {
        ranges.push((filter_offset, region.handler_offset));
    }
    ranges
}

fn disjoint_or_nested(a: (u32, u32), b: (u32, u32)) -> bool {
    let disjoint = a.1 <= b.0 || b.1 <= a.0;
    let a_in_b = b.0 <= a.0 && a.1 <= b.1;
    let b_in_a = a.0 <= b.0 && b.1 <= a.1;
    disjoint || a_in_b || b_in_a
}

/// Structural validation of a method's exception regions.
///
/// Every range must have positive length and lie inside the method body; the
/// ranges of a single region must be pairwise disjoint; and across regions,
/// any two ranges must be disjoint or properly nested.
///
/// # Errors
///
/// `RegionOutOfBounds` for bounds/shape violations, `RegionOverlap` for
/// improper nesting; both carried as [`Error::Verification`].
pub(crate) fn validate_regions(regions: &[ExceptionRegion], il_len: u32) -> Result<()> {
    for region in regions {
        if region.try_length == 0 || region.handler_length == 0 {
            return Err(region_failure(
                VerifierErrorKind::RegionOutOfBounds,
                region.try_offset,
            ));
        }
        if region.try_end() > il_len || region.handler_end() > il_len {
            return Err(region_failure(
                VerifierErrorKind::RegionOutOfBounds,
                region.try_offset,
            ));
        }
        match region.kind {
            RegionKind::Filter => match region.filter_offset {
                Some(filter_offset) if filter_offset < region.handler_offset => {}
                _ => {
                    return Err(region_failure(
                        VerifierErrorKind::RegionOutOfBounds,
                        region.handler_offset,
                    ))
                }
            },
            RegionKind::Catch => {
                if region.filter_offset.is_some() || region.caught_type.is_none() {
                    return Err(region_failure(
                        VerifierErrorKind::RegionOutOfBounds,
                        region.try_offset,
                    ));
                }
            }
            RegionKind::Finally | RegionKind::Fault => {
                if region.filter_offset.is_some() {
                    return Err(region_failure(
                        VerifierErrorKind::RegionOutOfBounds,
                        region.try_offset,
                    ));
                }
            }
        }

        let ranges = intervals(region);
        for (index, &a) in ranges.iter().enumerate() {
            for &b in &ranges[index + 1..] {
                if !(a.1 <= b.0 || b.1 <= a.0) {
                    return Err(region_failure(
                        VerifierErrorKind::RegionOverlap,
                        region.try_offset,
                    ));
                }
            }
        }
    }

    for (index, first) in regions.iter().enumerate() {
        for second in &regions[index + 1..] {
            for &a in &intervals(first) {
                for &b in &intervals(second) {
                    if !disjoint_or_nested(a, b) {
                        return Err(region_failure(
                            VerifierErrorKind::RegionOverlap,
                            second.try_offset,
                        ));
                    }
                }
            }
        }
    }

    Ok(())
}

/// Seeds the fixed entry stacks of every region anchor and queues them.
///
/// Anchors are roots of the dataflow regardless of incoming edges: a try
/// starts with an empty stack, a catch handler with the caught exception, a
/// filter (and the handler it elects) with the base exception type, and
/// finally/fault handlers with an empty stack.
pub(crate) fn seed_anchors(
    map: &mut BlockMap,
    regions: &[ExceptionRegion],
    oracle: &dyn TypeOracle,
) {
    let exception_base = oracle.well_known(WellKnown::Exception);

    for region in regions {
        let try_block = map.ensure(region.try_offset);
        if !try_block.entry_known {
            try_block.entry_stack = Vec::new();
            try_block.entry_known = true;
            try_block.seeded = true;
        }
        map.enqueue(region.try_offset);

        let handler_seed = match region.kind {
            RegionKind::Catch => {
                let caught = region.caught_type.unwrap_or(exception_base);
                vec![StackSlot::obj_ref(caught)]
            }
            RegionKind::Filter => vec![StackSlot::obj_ref(exception_base)],
            RegionKind::Finally | RegionKind::Fault => Vec::new(),
        };
        let handler_block = map.ensure(region.handler_offset);
        handler_block.entry_stack = handler_seed;
        handler_block.entry_known = true;
        handler_block.seeded = true;
        map.enqueue(region.handler_offset);

        if let Some(filter_offset) = region.filter_offset {
            let filter_block = map.ensure(filter_offset);
            filter_block.entry_stack = vec![StackSlot::obj_ref(exception_base)];
            filter_block.entry_known = true;
            filter_block.seeded = true;
            map.enqueue(filter_offset);
        }
    }
}

/// The innermost region whose protected block contains `offset`.
pub(crate) fn innermost_try(
    regions: &[ExceptionRegion],
    offset: u32,
) -> Option<&ExceptionRegion> {
    regions
        .iter()
        .filter(|region| region.contains_try(offset))
        .min_by_key(|region| region.try_length)
}

/// The innermost region whose handler contains `offset`.
pub(crate) fn innermost_handler(
    regions: &[ExceptionRegion],
    offset: u32,
) -> Option<&ExceptionRegion> {
    regions
        .iter()
        .filter(|region| region.contains_handler(offset))
        .min_by_key(|region| region.handler_length)
}

/// The filter region whose filter expression contains `offset`.
pub(crate) fn enclosing_filter(
    regions: &[ExceptionRegion],
    offset: u32,
) -> Option<&ExceptionRegion> {
    regions.iter().find(|region| region.contains_filter(offset))
}

/// True if `offset` lies inside any try, handler, or filter range.
pub(crate) fn inside_any_region(regions: &[ExceptionRegion], offset: u32) -> bool {
    regions.iter().any(|region| region.contains(offset))
}

/// Validates a `leave` at `offset` targeting `target`.
///
/// A `leave` is only meaningful inside a protected region. From a try it must
/// exit that try; from a catch or filter handler it must exit that handler;
/// from a finally or fault handler, and from a filter expression, it is
/// always invalid.
pub(crate) fn validate_leave(
    regions: &[ExceptionRegion],
    offset: u32,
    target: u32,
) -> std::result::Result<(), VerifierErrorKind> {
    if enclosing_filter(regions, offset).is_some() {
        return Err(VerifierErrorKind::Leave);
    }

    let enclosing_try = innermost_try(regions, offset);
    let enclosing_handler = innermost_handler(regions, offset);

    // The innermost construct containing the leave governs: a try nested in
    // a handler follows the try rule, and vice versa.
    match (enclosing_try, enclosing_handler) {
        (None, None) => Err(VerifierErrorKind::Leave),
        (Some(try_region), None) => leave_from_try(try_region, target),
        (None, Some(handler_region)) => leave_from_handler(handler_region, target),
        (Some(try_region), Some(handler_region)) => {
            let try_governs = try_region.try_offset >= handler_region.handler_offset
                && try_region.try_end() <= handler_region.handler_end();
            if try_governs {
                leave_from_try(try_region, target)
            } else {
                leave_from_handler(handler_region, target)
            }
        }
    }
}

fn leave_from_try(
    region: &ExceptionRegion,
    target: u32,
) -> std::result::Result<(), VerifierErrorKind> {
    if region.contains_try(target) {
        return Err(VerifierErrorKind::Leave);
    }
    Ok(())
}

fn leave_from_handler(
    region: &ExceptionRegion,
    target: u32,
) -> std::result::Result<(), VerifierErrorKind> {
    match region.kind {
        RegionKind::Finally | RegionKind::Fault => Err(VerifierErrorKind::Leave),
        RegionKind::Catch | RegionKind::Filter => {
            if region.contains_handler(target) {
                return Err(VerifierErrorKind::Leave);
            }
            Ok(())
        }
    }
}

fn contains_handler_or_filter(region: &ExceptionRegion, offset: u32) -> bool {
    region.contains_handler(offset) || region.contains_filter(offset)
}

/// Validates a branch (or `leave`) edge from `from` to `to` against every
/// region boundary.
///
/// Branches may never enter a protected block or a handler from outside, and
/// plain branches may not exit them either - only `leave` exits.
pub(crate) fn validate_branch(
    regions: &[ExceptionRegion],
    from: u32,
    to: u32,
    is_leave: bool,
) -> std::result::Result<(), VerifierErrorKind> {
    for region in regions {
        let from_try = region.contains_try(from);
        let to_try = region.contains_try(to);
        if to_try && !from_try {
            return Err(VerifierErrorKind::BranchIntoTry);
        }
        if from_try && !to_try && !is_leave {
            return Err(VerifierErrorKind::BranchOutOfTry);
        }

        let from_handler = contains_handler_or_filter(region, from);
        let to_handler = contains_handler_or_filter(region, to);
        if to_handler && !from_handler {
            return Err(VerifierErrorKind::BranchIntoHandler);
        }
        if from_handler && !to_handler && !is_leave {
            return Err(VerifierErrorKind::BranchOutOfHandler);
        }
    }
    Ok(())
}

/// Validates a fallthrough edge from the end of one instruction (`from`) to
/// the next (`to`).
///
/// The single tolerated boundary crossing is falling into a protected block
/// exactly at its first instruction, from an adjacent block outside it.
/// Every other crossing (into a handler or filter, off the end of a try or a
/// handler) is a fallthrough violation.
pub(crate) fn validate_fallthrough(
    regions: &[ExceptionRegion],
    from: u32,
    to: u32,
) -> std::result::Result<(), VerifierErrorKind> {
    for region in regions {
        let from_try = region.contains_try(from);
        let to_try = region.contains_try(to);
        if to_try && !from_try && to != region.try_offset {
            return Err(VerifierErrorKind::FallthroughException);
        }
        if from_try && !to_try {
            return Err(VerifierErrorKind::FallthroughException);
        }

        let from_handler = contains_handler_or_filter(region, from);
        let to_handler = contains_handler_or_filter(region, to);
        if (to_handler && !from_handler) || (from_handler && !to_handler) {
            return Err(VerifierErrorKind::FallthroughException);
        }
        // Inside a filter region, falling from the filter expression into
        // the elected handler bypasses endfilter.
        if region.contains_filter(from) && region.contains_handler(to) {
            return Err(VerifierErrorKind::FallthroughException);
        }
    }
    Ok(())
}
