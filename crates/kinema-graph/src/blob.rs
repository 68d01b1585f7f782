//! Baked-blob serialization.
//!
//! A graph serializes to a single linear buffer: a fixed header carrying the
//! `DMSM` magic and parameter counts, a section table of `(offset, count)`
//! pairs relative to the blob start, then the record arrays in a fixed order.
//! All fields are little-endian; a blob written on a machine of the opposite
//! byte order shows a reversed magic and is rejected. Encoding is canonical,
//! so decode followed by encode reproduces the input byte-for-byte.

use glam::Vec2;
use kinema_core::curve::CurveKey;

use crate::graph::{
    AnyStateTransition, Blend2DAlgorithm, Comparator, Condition, Directional2DPayload,
    DirectionalBlendEntry, ExitTransitionGroup, Linear1DPayload, LinearBlendEntry, SinglePayload,
    StateGraph, StateKind, StateRecord, TransitionRecord,
};
use crate::{GraphError, GraphResult};

/// Blob magic, `"DMSM"` in file byte order.
pub const BLOB_MAGIC: u32 = u32::from_le_bytes(*b"DMSM");
const BLOB_MAGIC_SWAPPED: u32 = BLOB_MAGIC.swap_bytes();

/// Current blob format version.
pub const BLOB_VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 4 + 2 + 2 + 2 + 2 + 2 + 2 + 2;
const SECTION_COUNT: usize = 12;
const SECTION_TABLE_LEN: usize = SECTION_COUNT * 8;

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn bool(&mut self, value: bool) {
        self.u8(value as u8);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> GraphResult<&'a [u8]> {
        let end = self
            .cursor
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| GraphError::InvalidBlob("unexpected end of blob".into()))?;
        let bytes = &self.buf[self.cursor..end];
        self.cursor = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> GraphResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> GraphResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> GraphResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn f32(&mut self) -> GraphResult<f32> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn bool(&mut self) -> GraphResult<bool> {
        Ok(self.u8()? != 0)
    }
}

/// Serialize a graph into its canonical blob form.
pub fn encode(graph: &StateGraph) -> Vec<u8> {
    let mut w = Writer { buf: Vec::new() };

    w.u32(BLOB_MAGIC);
    w.u32(BLOB_VERSION);
    w.u16(graph.default_state);
    w.u16(graph.states.len() as u16);
    w.u16(graph.any_transitions.len() as u16);
    w.u16(graph.exit_groups.len() as u16);
    w.u16(graph.bool_param_count);
    w.u16(graph.int_param_count);
    w.u16(graph.float_param_count);

    // Section table placeholder, patched once the offsets are known.
    let table_at = w.buf.len();
    w.buf.resize(table_at + SECTION_TABLE_LEN, 0);

    let mut table = [(0u32, 0u32); SECTION_COUNT];
    let mut section = 0;
    let mut begin = |w: &mut Writer, count: usize, table: &mut [(u32, u32); SECTION_COUNT]| {
        table[section] = (w.buf.len() as u32, count as u32);
        section += 1;
    };

    begin(&mut w, graph.states.len(), &mut table);
    for state in &graph.states {
        w.u8(state_kind_tag(state.kind));
        w.bool(state.looping);
        w.u16(state.payload);
        w.f32(state.base_speed);
        w.u16(state.speed_parameter);
        w.u16(state.exit_group);
        w.u32(state.first_transition);
        w.u32(state.transition_count);
    }

    begin(&mut w, graph.transitions.len(), &mut table);
    for transition in &graph.transitions {
        write_transition(&mut w, transition);
    }

    begin(&mut w, graph.any_transitions.len(), &mut table);
    for any in &graph.any_transitions {
        write_transition(&mut w, &any.transition);
        w.bool(any.allow_self);
    }

    begin(&mut w, graph.exit_groups.len(), &mut table);
    for group in &graph.exit_groups {
        w.u32(group.first_transition);
        w.u32(group.transition_count);
    }

    begin(&mut w, graph.single_payloads.len(), &mut table);
    for payload in &graph.single_payloads {
        w.u16(payload.clip);
    }

    begin(&mut w, graph.linear_payloads.len(), &mut table);
    for payload in &graph.linear_payloads {
        w.u16(payload.blend_parameter);
        w.u32(payload.first_entry);
        w.u32(payload.entry_count);
    }

    begin(&mut w, graph.linear_entries.len(), &mut table);
    for entry in &graph.linear_entries {
        w.f32(entry.threshold);
        w.u16(entry.clip);
        w.f32(entry.clip_speed);
    }

    begin(&mut w, graph.directional_payloads.len(), &mut table);
    for payload in &graph.directional_payloads {
        w.u16(payload.x_parameter);
        w.u16(payload.y_parameter);
        w.u8(algorithm_tag(payload.algorithm));
        w.u32(payload.first_entry);
        w.u32(payload.entry_count);
    }

    begin(&mut w, graph.directional_entries.len(), &mut table);
    for entry in &graph.directional_entries {
        w.f32(entry.position.x);
        w.f32(entry.position.y);
        w.u16(entry.clip);
        w.f32(entry.clip_speed);
    }

    begin(&mut w, graph.curve_keys.len(), &mut table);
    for key in &graph.curve_keys {
        w.f32(key.time);
        w.f32(key.value);
        w.f32(key.in_tangent);
        w.f32(key.out_tangent);
    }

    begin(&mut w, graph.conditions.len(), &mut table);
    for condition in &graph.conditions {
        w.u16(condition.parameter);
        w.u8(condition.comparator.to_u8());
        w.f32(condition.rhs);
    }

    begin(&mut w, graph.debug_names.len(), &mut table);
    for name in &graph.debug_names {
        w.u16(name.len() as u16);
        w.buf.extend_from_slice(name.as_bytes());
    }

    for (index, (offset, count)) in table.iter().enumerate() {
        let at = table_at + index * 8;
        w.buf[at..at + 4].copy_from_slice(&offset.to_le_bytes());
        w.buf[at + 4..at + 8].copy_from_slice(&count.to_le_bytes());
    }

    w.buf
}

/// Deserialize and validate a graph from its blob form.
pub fn decode(bytes: &[u8]) -> GraphResult<StateGraph> {
    if bytes.len() < HEADER_LEN + SECTION_TABLE_LEN {
        return Err(GraphError::InvalidBlob(format!(
            "blob of {} bytes is shorter than the header",
            bytes.len()
        )));
    }

    let mut r = Reader {
        buf: bytes,
        cursor: 0,
    };

    let magic = r.u32()?;
    if magic == BLOB_MAGIC_SWAPPED {
        return Err(GraphError::ByteOrderMismatch);
    }
    if magic != BLOB_MAGIC {
        return Err(GraphError::InvalidBlob(format!(
            "bad magic {magic:#010x}"
        )));
    }
    let version = r.u32()?;
    if version != BLOB_VERSION {
        return Err(GraphError::UnsupportedVersion(version));
    }

    let default_state = r.u16()?;
    let n_states = r.u16()? as usize;
    let n_any = r.u16()? as usize;
    let n_exit_groups = r.u16()? as usize;
    let bool_param_count = r.u16()?;
    let int_param_count = r.u16()?;
    let float_param_count = r.u16()?;

    let mut table = [(0u32, 0u32); SECTION_COUNT];
    for slot in &mut table {
        let offset = r.u32()?;
        let count = r.u32()?;
        *slot = (offset, count);
    }

    if table[0].1 as usize != n_states
        || table[2].1 as usize != n_any
        || table[3].1 as usize != n_exit_groups
    {
        return Err(GraphError::InvalidBlob(
            "section table disagrees with header counts".into(),
        ));
    }

    let (mut r, count) = section_reader(bytes, &table, 0)?;
    let mut states = Vec::with_capacity(count);
    for _ in 0..count {
        let kind = state_kind_from_tag(r.u8()?)?;
        let looping = r.bool()?;
        let payload = r.u16()?;
        let base_speed = r.f32()?;
        let speed_parameter = r.u16()?;
        let exit_group = r.u16()?;
        let first_transition = r.u32()?;
        let transition_count = r.u32()?;
        states.push(StateRecord {
            kind,
            payload,
            base_speed,
            speed_parameter,
            looping,
            first_transition,
            transition_count,
            exit_group,
        });
    }

    let (mut r, count) = section_reader(bytes, &table, 1)?;
    let mut transitions = Vec::with_capacity(count);
    for _ in 0..count {
        transitions.push(read_transition(&mut r)?);
    }

    let (mut r, count) = section_reader(bytes, &table, 2)?;
    let mut any_transitions = Vec::with_capacity(count);
    for _ in 0..count {
        let transition = read_transition(&mut r)?;
        let allow_self = r.bool()?;
        any_transitions.push(AnyStateTransition {
            transition,
            allow_self,
        });
    }

    let (mut r, count) = section_reader(bytes, &table, 3)?;
    let mut exit_groups = Vec::with_capacity(count);
    for _ in 0..count {
        exit_groups.push(ExitTransitionGroup {
            first_transition: r.u32()?,
            transition_count: r.u32()?,
        });
    }

    let (mut r, count) = section_reader(bytes, &table, 4)?;
    let mut single_payloads = Vec::with_capacity(count);
    for _ in 0..count {
        single_payloads.push(SinglePayload { clip: r.u16()? });
    }

    let (mut r, count) = section_reader(bytes, &table, 5)?;
    let mut linear_payloads = Vec::with_capacity(count);
    for _ in 0..count {
        linear_payloads.push(Linear1DPayload {
            blend_parameter: r.u16()?,
            first_entry: r.u32()?,
            entry_count: r.u32()?,
        });
    }

    let (mut r, count) = section_reader(bytes, &table, 6)?;
    let mut linear_entries = Vec::with_capacity(count);
    for _ in 0..count {
        linear_entries.push(LinearBlendEntry {
            threshold: r.f32()?,
            clip: r.u16()?,
            clip_speed: r.f32()?,
        });
    }

    let (mut r, count) = section_reader(bytes, &table, 7)?;
    let mut directional_payloads = Vec::with_capacity(count);
    for _ in 0..count {
        let x_parameter = r.u16()?;
        let y_parameter = r.u16()?;
        let algorithm = algorithm_from_tag(r.u8()?)?;
        let first_entry = r.u32()?;
        let entry_count = r.u32()?;
        directional_payloads.push(Directional2DPayload {
            x_parameter,
            y_parameter,
            first_entry,
            entry_count,
            algorithm,
        });
    }

    let (mut r, count) = section_reader(bytes, &table, 8)?;
    let mut directional_entries = Vec::with_capacity(count);
    for _ in 0..count {
        let x = r.f32()?;
        let y = r.f32()?;
        directional_entries.push(DirectionalBlendEntry {
            position: Vec2::new(x, y),
            clip: r.u16()?,
            clip_speed: r.f32()?,
        });
    }

    let (mut r, count) = section_reader(bytes, &table, 9)?;
    let mut curve_keys = Vec::with_capacity(count);
    for _ in 0..count {
        curve_keys.push(CurveKey {
            time: r.f32()?,
            value: r.f32()?,
            in_tangent: r.f32()?,
            out_tangent: r.f32()?,
        });
    }

    let (mut r, count) = section_reader(bytes, &table, 10)?;
    let mut conditions = Vec::with_capacity(count);
    for _ in 0..count {
        let parameter = r.u16()?;
        let comparator = Comparator::from_u8(r.u8()?)?;
        let rhs = r.f32()?;
        conditions.push(Condition {
            parameter,
            comparator,
            rhs,
        });
    }

    let (mut r, count) = section_reader(bytes, &table, 11)?;
    let mut debug_names = Vec::with_capacity(count);
    for _ in 0..count {
        let len = r.u16()? as usize;
        let raw = r.take(len)?;
        let name = std::str::from_utf8(raw)
            .map_err(|_| GraphError::InvalidBlob("debug name is not valid UTF-8".into()))?;
        debug_names.push(name.to_string());
    }

    let graph = StateGraph {
        states,
        transitions,
        any_transitions,
        exit_groups,
        single_payloads,
        linear_payloads,
        linear_entries,
        directional_payloads,
        directional_entries,
        curve_keys,
        conditions,
        debug_names,
        default_state,
        bool_param_count,
        int_param_count,
        float_param_count,
    };
    graph.validate()?;
    Ok(graph)
}

fn section_reader<'a>(
    bytes: &'a [u8],
    table: &[(u32, u32); SECTION_COUNT],
    index: usize,
) -> GraphResult<(Reader<'a>, usize)> {
    let (offset, count) = table[index];
    if offset as usize > bytes.len() {
        return Err(GraphError::InvalidBlob(format!(
            "section {index} offset {offset} beyond blob end"
        )));
    }
    Ok((
        Reader {
            buf: bytes,
            cursor: offset as usize,
        },
        count as usize,
    ))
}

fn write_transition(w: &mut Writer, transition: &TransitionRecord) {
    w.u16(transition.to_state);
    w.bool(transition.has_exit_time);
    w.f32(transition.duration);
    w.f32(transition.exit_time);
    w.u32(transition.first_condition);
    w.u32(transition.condition_count);
    w.u32(transition.first_curve_key);
    w.u32(transition.curve_key_count);
}

fn read_transition(r: &mut Reader<'_>) -> GraphResult<TransitionRecord> {
    let to_state = r.u16()?;
    let has_exit_time = r.bool()?;
    let duration = r.f32()?;
    let exit_time = r.f32()?;
    let first_condition = r.u32()?;
    let condition_count = r.u32()?;
    let first_curve_key = r.u32()?;
    let curve_key_count = r.u32()?;
    Ok(TransitionRecord {
        to_state,
        duration,
        has_exit_time,
        exit_time,
        first_condition,
        condition_count,
        first_curve_key,
        curve_key_count,
    })
}

fn state_kind_tag(kind: StateKind) -> u8 {
    match kind {
        StateKind::Single => 0,
        StateKind::Linear1D => 1,
        StateKind::Directional2D => 2,
    }
}

fn state_kind_from_tag(tag: u8) -> GraphResult<StateKind> {
    Ok(match tag {
        0 => StateKind::Single,
        1 => StateKind::Linear1D,
        2 => StateKind::Directional2D,
        other => {
            return Err(GraphError::InvalidBlob(format!(
                "unknown state kind tag {other}"
            )))
        }
    })
}

fn algorithm_tag(algorithm: Option<Blend2DAlgorithm>) -> u8 {
    match algorithm {
        None => 0,
        Some(Blend2DAlgorithm::InverseDistance) => 1,
        Some(Blend2DAlgorithm::GradientBand) => 2,
    }
}

fn algorithm_from_tag(tag: u8) -> GraphResult<Option<Blend2DAlgorithm>> {
    Ok(match tag {
        0 => None,
        1 => Some(Blend2DAlgorithm::InverseDistance),
        2 => Some(Blend2DAlgorithm::GradientBand),
        other => {
            return Err(GraphError::InvalidBlob(format!(
                "unknown 2D algorithm tag {other}"
            )))
        }
    })
}
