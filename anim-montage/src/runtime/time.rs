/// Outcome of [`advance_time`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AdvanceType {
    Default,
    Looped,
    Finished,
}

/// Moves `time` by `delta` within `[0, end]`. Leaving the range wraps when
/// looping is allowed, otherwise clamps to the boundary.
pub fn advance_time(allow_looping: bool, delta: f32, time: &mut f32, end: f32) -> AdvanceType {
    *time += delta;
    if *time >= 0.0 && *time <= end {
        return AdvanceType::Default;
    }
    if allow_looping {
        if end != 0.0 {
            *time %= end;
            if *time < 0.0 {
                *time += end;
            }
        } else {
            *time = 0.0;
        }
        AdvanceType::Looped
    } else {
        *time = time.clamp(0.0, end.max(0.0));
        AdvanceType::Finished
    }
}
