//! 紧凑二进制线上格式（小端）
//!
//! ```text
//! "LPSE" u16:version u8:flags [f32 speed] [f32 minion_speed] [transform minion_lock]
//! cursed:  pose
//! 否则:    u16 n { u16 u16 pose } u16 n { u16 pose } u16 n { u32 pose }
//! u16 n { u32 partial u32 control f32 time f32 speed }
//! ```
//! 传输字符串为整段字节的 base64。

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::{Quat, Vec3};
use std::io::{Cursor, Read, Write};

use super::live_pose_data::{
    BodyPoseData, BonePoseData, CharacterPoseData, FacePoseData, MinionPoseData, PoseData,
};
use crate::animation::AnimationState;
use crate::pose::{MirrorMode, PoseStackEntry};
use crate::skeleton::{
    BoneId, BoneIkInfo, IkSolverOptions, PoseSlot, Transform, TransformComponents,
};
use crate::{PoseError, Result};

const MAGIC: &[u8; 4] = b"LPSE";
pub const WIRE_VERSION: u16 = 1;

const FLAG_CURSED: u8 = 1 << 0;
const FLAG_FROZEN: u8 = 1 << 1;
const FLAG_SPEED: u8 = 1 << 2;
const FLAG_MINION_SPEED: u8 = 1 << 3;
const FLAG_MINION_LOCK: u8 = 1 << 4;

const IK_ENABLED: u8 = 1 << 0;
const IK_ENFORCE: u8 = 1 << 1;

/// 编码为字节
pub fn encode(data: &CharacterPoseData) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    out.write_all(MAGIC)?;
    out.write_u16::<LittleEndian>(WIRE_VERSION)?;

    let mut flags = 0u8;
    if data.cursed_pose.is_some() {
        flags |= FLAG_CURSED;
    }
    if data.frozen {
        flags |= FLAG_FROZEN;
    }
    if data.speed_multiplier.is_some() {
        flags |= FLAG_SPEED;
    }
    if data.minion_speed_multiplier.is_some() {
        flags |= FLAG_MINION_SPEED;
    }
    if data.minion_lock.is_some() {
        flags |= FLAG_MINION_LOCK;
    }
    out.write_u8(flags)?;

    if let Some(speed) = data.speed_multiplier {
        out.write_f32::<LittleEndian>(speed)?;
    }
    if let Some(speed) = data.minion_speed_multiplier {
        out.write_f32::<LittleEndian>(speed)?;
    }
    if let Some(lock) = &data.minion_lock {
        write_transform(&mut out, lock)?;
    }

    if let Some(cursed) = &data.cursed_pose {
        write_pose(&mut out, cursed)?;
    } else {
        write_count(&mut out, data.body_poses.len())?;
        for body in &data.body_poses {
            out.write_u16::<LittleEndian>(body.timeline)?;
            out.write_u16::<LittleEndian>(body.secondary_timeline)?;
            write_pose(&mut out, &body.pose)?;
        }
        write_count(&mut out, data.face_poses.len())?;
        for face in &data.face_poses {
            out.write_u16::<LittleEndian>(face.timeline)?;
            write_pose(&mut out, &face.pose)?;
        }
        write_count(&mut out, data.minion_poses.len())?;
        for minion in &data.minion_poses {
            out.write_u32::<LittleEndian>(minion.minion)?;
            write_pose(&mut out, &minion.pose)?;
        }
    }

    write_count(&mut out, data.animation_states.len())?;
    for state in &data.animation_states {
        out.write_u32::<LittleEndian>(state.partial_index)?;
        out.write_u32::<LittleEndian>(state.control_index)?;
        out.write_f32::<LittleEndian>(state.local_time)?;
        out.write_f32::<LittleEndian>(state.playback_speed)?;
    }
    Ok(out)
}

/// 完整解码；任何错误都不会留下部分结果
pub fn decode(bytes: &[u8]) -> Result<CharacterPoseData> {
    decode_inner(&mut Cursor::new(bytes)).map_err(|e| match e {
        PoseError::Io(io) => PoseError::Wire(format!("truncated payload: {io}")),
        other => other,
    })
}

pub fn encode_string(data: &CharacterPoseData) -> Result<String> {
    Ok(STANDARD.encode(encode(data)?))
}

pub fn decode_string(text: &str) -> Result<CharacterPoseData> {
    let text = text.trim();
    if text.is_empty() {
        return Err(PoseError::Wire("empty payload".to_string()));
    }
    let bytes = STANDARD
        .decode(text)
        .map_err(|e| PoseError::Wire(format!("invalid base64: {e}")))?;
    decode(&bytes)
}

fn decode_inner(r: &mut Cursor<&[u8]>) -> Result<CharacterPoseData> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(PoseError::Wire("bad magic".to_string()));
    }
    let version = r.read_u16::<LittleEndian>()?;
    if version != WIRE_VERSION {
        return Err(PoseError::Wire(format!("unsupported version {version}")));
    }

    let flags = r.read_u8()?;
    let mut data = CharacterPoseData {
        frozen: flags & FLAG_FROZEN != 0,
        ..Default::default()
    };
    if flags & FLAG_SPEED != 0 {
        data.speed_multiplier = Some(read_finite(r)?);
    }
    if flags & FLAG_MINION_SPEED != 0 {
        data.minion_speed_multiplier = Some(read_finite(r)?);
    }
    if flags & FLAG_MINION_LOCK != 0 {
        data.minion_lock = Some(read_transform(r)?);
    }

    if flags & FLAG_CURSED != 0 {
        data.cursed_pose = Some(read_pose(r)?);
    } else {
        for _ in 0..r.read_u16::<LittleEndian>()? {
            let timeline = r.read_u16::<LittleEndian>()?;
            let secondary_timeline = r.read_u16::<LittleEndian>()?;
            data.body_poses.push(BodyPoseData {
                timeline,
                secondary_timeline,
                pose: read_pose(r)?,
            });
        }
        for _ in 0..r.read_u16::<LittleEndian>()? {
            let timeline = r.read_u16::<LittleEndian>()?;
            data.face_poses.push(FacePoseData {
                timeline,
                pose: read_pose(r)?,
            });
        }
        for _ in 0..r.read_u16::<LittleEndian>()? {
            let minion = r.read_u32::<LittleEndian>()?;
            data.minion_poses.push(MinionPoseData {
                minion,
                pose: read_pose(r)?,
            });
        }
    }

    for _ in 0..r.read_u16::<LittleEndian>()? {
        data.animation_states.push(AnimationState {
            partial_index: r.read_u32::<LittleEndian>()?,
            control_index: r.read_u32::<LittleEndian>()?,
            local_time: read_finite(r)?,
            playback_speed: read_finite(r)?,
        });
    }

    if (r.position() as usize) != r.get_ref().len() {
        return Err(PoseError::Wire("trailing bytes".to_string()));
    }
    Ok(data)
}

fn write_count<W: Write>(w: &mut W, count: usize) -> Result<()> {
    let count = u16::try_from(count)
        .map_err(|_| PoseError::Wire(format!("too many entries: {count}")))?;
    w.write_u16::<LittleEndian>(count)?;
    Ok(())
}

fn write_string<W: Write>(w: &mut W, s: &str) -> Result<()> {
    write_count(w, s.len())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_string(r: &mut Cursor<&[u8]>) -> Result<String> {
    let len = r.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| PoseError::Wire(format!("invalid bone name: {e}")))
}

fn read_finite(r: &mut Cursor<&[u8]>) -> Result<f32> {
    let value = r.read_f32::<LittleEndian>()?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PoseError::Wire("non-finite value".to_string()))
    }
}

fn write_vec3<W: Write>(w: &mut W, v: Vec3) -> Result<()> {
    for c in v.to_array() {
        w.write_f32::<LittleEndian>(c)?;
    }
    Ok(())
}

fn read_vec3(r: &mut Cursor<&[u8]>) -> Result<Vec3> {
    Ok(Vec3::new(read_finite(r)?, read_finite(r)?, read_finite(r)?))
}

fn write_transform<W: Write>(w: &mut W, t: &Transform) -> Result<()> {
    write_vec3(w, t.position)?;
    for c in t.rotation.to_array() {
        w.write_f32::<LittleEndian>(c)?;
    }
    write_vec3(w, t.scale)
}

fn read_transform(r: &mut Cursor<&[u8]>) -> Result<Transform> {
    let position = read_vec3(r)?;
    let rotation = Quat::from_xyzw(
        read_finite(r)?,
        read_finite(r)?,
        read_finite(r)?,
        read_finite(r)?,
    );
    let scale = read_vec3(r)?;
    Ok(Transform::new(position, rotation, scale))
}

fn write_ik<W: Write>(w: &mut W, ik: &BoneIkInfo) -> Result<()> {
    let mut flags = 0u8;
    if ik.enabled {
        flags |= IK_ENABLED;
    }
    if ik.enforce_constraints {
        flags |= IK_ENFORCE;
    }
    w.write_u8(flags)?;
    w.write_u8(ik.solver.type_index())?;
    match ik.solver {
        IkSolverOptions::Ccd { depth, iterations } => {
            w.write_u32::<LittleEndian>(depth)?;
            w.write_u32::<LittleEndian>(iterations)?;
        }
        IkSolverOptions::TwoJoint {
            first_bone,
            second_bone,
            end_bone,
            rotation_axis,
        } => {
            w.write_u32::<LittleEndian>(first_bone)?;
            w.write_u32::<LittleEndian>(second_bone)?;
            w.write_u32::<LittleEndian>(end_bone)?;
            write_vec3(w, rotation_axis)?;
        }
    }
    Ok(())
}

fn read_ik(r: &mut Cursor<&[u8]>) -> Result<BoneIkInfo> {
    let flags = r.read_u8()?;
    let solver = match r.read_u8()? {
        0 => IkSolverOptions::Ccd {
            depth: r.read_u32::<LittleEndian>()?,
            iterations: r.read_u32::<LittleEndian>()?,
        },
        1 => IkSolverOptions::TwoJoint {
            first_bone: r.read_u32::<LittleEndian>()?,
            second_bone: r.read_u32::<LittleEndian>()?,
            end_bone: r.read_u32::<LittleEndian>()?,
            rotation_axis: read_vec3(r)?,
        },
        other => return Err(PoseError::Wire(format!("unknown IK type {other}"))),
    };
    Ok(BoneIkInfo {
        enabled: flags & IK_ENABLED != 0,
        enforce_constraints: flags & IK_ENFORCE != 0,
        solver,
    })
}

fn mirror_mode_to_u8(mode: MirrorMode) -> u8 {
    match mode {
        MirrorMode::None => 0,
        MirrorMode::Copy => 1,
        MirrorMode::Mirror => 2,
    }
}

fn mirror_mode_from_u8(value: u8) -> Result<MirrorMode> {
    match value {
        0 => Ok(MirrorMode::None),
        1 => Ok(MirrorMode::Copy),
        2 => Ok(MirrorMode::Mirror),
        other => Err(PoseError::Wire(format!("unknown mirror mode {other}"))),
    }
}

fn write_pose<W: Write>(w: &mut W, pose: &PoseData) -> Result<()> {
    write_count(w, pose.bones.len())?;
    for bone in &pose.bones {
        write_string(w, &bone.id.bone_name)?;
        w.write_i32::<LittleEndian>(bone.id.partial_index)?;
        w.write_u8(bone.id.slot as u8)?;
        w.write_u8(mirror_mode_to_u8(bone.mirror_mode))?;
        write_ik(w, &bone.default_ik)?;

        let stacks: Vec<_> = bone.stacks.iter().filter(|s| s.is_effective()).collect();
        write_count(w, stacks.len())?;
        for entry in stacks {
            write_transform(w, &entry.transform)?;
            w.write_u8(entry.propagate.bits())?;
            w.write_u8(entry.components.bits())?;
            write_ik(w, &entry.ik)?;
        }
    }
    Ok(())
}

fn read_pose(r: &mut Cursor<&[u8]>) -> Result<PoseData> {
    let count = r.read_u16::<LittleEndian>()?;
    let mut bones = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = read_string(r)?;
        let partial_index = r.read_i32::<LittleEndian>()?;
        let slot = PoseSlot::from_u8(r.read_u8()?);
        let mirror_mode = mirror_mode_from_u8(r.read_u8()?)?;
        let default_ik = read_ik(r)?;

        let entries = r.read_u16::<LittleEndian>()?;
        let mut stacks = Vec::with_capacity(entries as usize);
        for _ in 0..entries {
            let transform = read_transform(r)?;
            let propagate = TransformComponents::from_bits_truncate(r.read_u8()?);
            let components = TransformComponents::from_bits_truncate(r.read_u8()?);
            let ik = read_ik(r)?;
            stacks.push(PoseStackEntry {
                transform,
                propagate,
                components,
                ik,
            });
        }
        bones.push(BonePoseData {
            id: BoneId::new(name, partial_index, slot),
            mirror_mode,
            default_ik,
            stacks,
        });
    }
    Ok(PoseData { bones })
}
