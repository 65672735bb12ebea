// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scene commands in the format read by the element stage.

use std::fmt;

use peniko::kurbo::{Point, Rect};

use crate::math::{point_to_f32, IntPoint, Transform};

/// Size of a scene command in bytes.
pub const COMMAND_SIZE: usize = size_of::<Command>();

/// One scene element: an opcode word followed by up to eight payload words.
pub type Command = [u32; 9];

/// Scene command opcodes.
///
/// This must be kept in sync with `scene.h` in the kernels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandOp {
    Nop = 0,
    Line = 1,
    Quad = 2,
    Cubic = 3,
    FillColor = 4,
    LineWidth = 5,
    Transform = 6,
    BeginClip = 7,
    EndClip = 8,
    FillImage = 9,
    SetFillMode = 10,
    /// A move between contours. Never reaches the kernels.
    Gap = 11,
}

impl CommandOp {
    pub fn from_u32(op: u32) -> Option<Self> {
        Some(match op {
            0 => Self::Nop,
            1 => Self::Line,
            2 => Self::Quad,
            3 => Self::Cubic,
            4 => Self::FillColor,
            5 => Self::LineWidth,
            6 => Self::Transform,
            7 => Self::BeginClip,
            8 => Self::EndClip,
            9 => Self::FillImage,
            10 => Self::SetFillMode,
            11 => Self::Gap,
            _ => return None,
        })
    }
}

/// How a path is filled.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FillMode {
    #[default]
    NonZero = 0,
    Stroke = 1,
}

/// Returns the opcode of `cmd`.
///
/// # Panics
///
/// Panics if the opcode word is not a known command.
pub fn op(cmd: &Command) -> CommandOp {
    CommandOp::from_u32(cmd[0]).unwrap_or_else(|| panic!("invalid scene command {}", cmd[0]))
}

fn points<const N: usize>(op: CommandOp, pts: [Point; N]) -> Command {
    let mut cmd = [0; 9];
    cmd[0] = op as u32;
    for (i, p) in pts.iter().enumerate() {
        let [x, y] = point_to_f32(*p);
        cmd[1 + i * 2] = x.to_bits();
        cmd[2 + i * 2] = y.to_bits();
    }
    cmd
}

fn rect(op: CommandOp, bbox: &Rect) -> Command {
    points(op, [bbox.origin(), Point::new(bbox.x1, bbox.y1)])
}

pub fn line(from: Point, to: Point) -> Command {
    points(CommandOp::Line, [from, to])
}

pub fn gap(from: Point, to: Point) -> Command {
    points(CommandOp::Gap, [from, to])
}

pub fn quad(from: Point, ctrl: Point, to: Point) -> Command {
    points(CommandOp::Quad, [from, ctrl, to])
}

pub fn cubic(from: Point, ctrl0: Point, ctrl1: Point, to: Point) -> Command {
    points(CommandOp::Cubic, [from, ctrl0, ctrl1, to])
}

pub fn transform(t: &Transform) -> Command {
    let mut cmd = [0; 9];
    cmd[0] = CommandOp::Transform as u32;
    for (i, v) in t.matrix.iter().chain(&t.translation).enumerate() {
        cmd[1 + i] = v.to_bits();
    }
    cmd
}

pub fn line_width(width: f32) -> Command {
    let mut cmd = [0; 9];
    cmd[0] = CommandOp::LineWidth as u32;
    cmd[1] = width.to_bits();
    cmd
}

pub fn begin_clip(bbox: &Rect) -> Command {
    rect(CommandOp::BeginClip, bbox)
}

pub fn end_clip(bbox: &Rect) -> Command {
    rect(CommandOp::EndClip, bbox)
}

/// Fills with a premultiplied sRGB color.
pub fn fill_color(rgba: [u8; 4]) -> Command {
    let mut cmd = [0; 9];
    cmd[0] = CommandOp::FillColor as u32;
    cmd[1] = u32::from_be_bytes(rgba);
    cmd
}

/// Fills with the materials image at `index`, shifted by `offset`.
///
/// The offset is stored as two 16-bit signed integers.
pub fn fill_image(index: u32, offset: IntPoint) -> Command {
    let x = offset.x as i16 as u16 as u32;
    let y = offset.y as i16 as u16 as u32;
    let mut cmd = [0; 9];
    cmd[0] = CommandOp::FillImage as u32;
    cmd[1] = index;
    cmd[2] = x | (y << 16);
    cmd
}

pub fn fill_mode(mode: FillMode) -> Command {
    let mut cmd = [0; 9];
    cmd[0] = CommandOp::SetFillMode as u32;
    cmd[1] = mode as u32;
    cmd
}

fn point(cmd: &Command, i: usize) -> Point {
    Point::new(
        f32::from_bits(cmd[1 + i * 2]) as f64,
        f32::from_bits(cmd[2 + i * 2]) as f64,
    )
}

fn expect_op(cmd: &Command, expected: CommandOp) {
    assert_eq!(op(cmd), expected, "invalid command");
}

pub fn decode_line(cmd: &Command) -> (Point, Point) {
    expect_op(cmd, CommandOp::Line);
    (point(cmd, 0), point(cmd, 1))
}

pub fn decode_gap(cmd: &Command) -> (Point, Point) {
    expect_op(cmd, CommandOp::Gap);
    (point(cmd, 0), point(cmd, 1))
}

pub fn decode_quad(cmd: &Command) -> (Point, Point, Point) {
    expect_op(cmd, CommandOp::Quad);
    (point(cmd, 0), point(cmd, 1), point(cmd, 2))
}

pub fn decode_cubic(cmd: &Command) -> (Point, Point, Point, Point) {
    expect_op(cmd, CommandOp::Cubic);
    (point(cmd, 0), point(cmd, 1), point(cmd, 2), point(cmd, 3))
}

fn decode_rect(cmd: &Command) -> Rect {
    Rect::from_points(point(cmd, 0), point(cmd, 1))
}

fn decode_transform(cmd: &Command) -> Transform {
    let f = |i: usize| f32::from_bits(cmd[i]);
    Transform {
        matrix: [f(1), f(2), f(3), f(4)],
        translation: [f(5), f(6)],
    }
}

/// Formats a command for debugging.
#[derive(Debug)]
pub struct CommandDisplay<'a>(pub &'a Command);

impl fmt::Display for CommandDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cmd = self.0;
        match op(cmd) {
            CommandOp::Nop => write!(f, "nop"),
            CommandOp::Line => {
                let (from, to) = decode_line(cmd);
                write!(f, "line({from:?}, {to:?})")
            }
            CommandOp::Gap => {
                let (from, to) = decode_gap(cmd);
                write!(f, "gap({from:?}, {to:?})")
            }
            CommandOp::Quad => {
                let (from, ctrl, to) = decode_quad(cmd);
                write!(f, "quad({from:?}, {ctrl:?}, {to:?})")
            }
            CommandOp::Cubic => {
                let (from, ctrl0, ctrl1, to) = decode_cubic(cmd);
                write!(f, "cubic({from:?}, {ctrl0:?}, {ctrl1:?}, {to:?})")
            }
            CommandOp::FillColor => write!(f, "fillcolor {:#010x}", cmd[1]),
            CommandOp::LineWidth => write!(f, "linewidth {}", f32::from_bits(cmd[1])),
            CommandOp::Transform => write!(f, "transform ({:?})", decode_transform(cmd)),
            CommandOp::BeginClip => write!(f, "beginclip ({:?})", decode_rect(cmd)),
            CommandOp::EndClip => write!(f, "endclip ({:?})", decode_rect(cmd)),
            CommandOp::FillImage => write!(f, "fillimage {}", cmd[1]),
            CommandOp::SetFillMode => write!(f, "setfillmode {}", cmd[1]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_36_bytes() {
        assert_eq!(COMMAND_SIZE, 36);
    }

    #[test]
    fn fill_color_packs_alpha_in_low_byte() {
        let cmd = fill_color([0x11, 0x22, 0x33, 0x44]);
        assert_eq!(cmd[0], CommandOp::FillColor as u32);
        assert_eq!(cmd[1], 0x1122_3344);
    }

    #[test]
    fn fill_image_offsets_are_signed_16_bit() {
        let cmd = fill_image(0, IntPoint::new(-1, 3));
        assert_eq!(cmd[2], 0x0003_ffff);
    }

    #[test]
    fn transform_layout() {
        let t = Transform {
            matrix: [1.0, 2.0, 3.0, 4.0],
            translation: [5.0, 6.0],
        };
        let cmd = transform(&t);
        let words: Vec<f32> = cmd[1..7].iter().map(|w| f32::from_bits(*w)).collect();
        assert_eq!(words, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(cmd[7..], [0, 0]);
        assert_eq!(decode_transform(&cmd), t);
    }

    #[test]
    #[should_panic(expected = "invalid command")]
    fn decoding_wrong_op_panics() {
        decode_line(&gap(Point::ZERO, Point::new(1.0, 1.0)));
    }

    #[test]
    fn display_names_commands() {
        let cmd = begin_clip(&Rect::new(0.0, 0.0, 2.0, 3.0));
        assert!(CommandDisplay(&cmd).to_string().starts_with("beginclip"));
        assert_eq!(CommandDisplay(&[0; 9]).to_string(), "nop");
    }
}
