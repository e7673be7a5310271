//! Continuous-physics Pong simulation

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;

use crate::ws::protocol::{BallView, GameKind, GameSnapshot, PongSnapshot, ScoreView, Side};

use super::{SideInputs, Simulation};

/// Arena and physics constants
#[derive(Debug, Clone, Copy)]
pub struct PongConfig {
    pub width: f32,
    pub height: f32,
    pub paddle_width: f32,
    pub paddle_height: f32,
    /// Gap between the arena edge and a paddle's outer face
    pub paddle_margin: f32,
    /// Pixels per tick while a direction is held
    pub paddle_speed: f32,
    pub ball_radius: f32,
    /// Horizontal ball speed after a serve
    pub serve_speed_x: f32,
    /// Range of the vertical serve speed magnitude
    pub serve_speed_y_min: f32,
    pub serve_speed_y_max: f32,
    pub points_to_win: u32,
}

impl Default for PongConfig {
    fn default() -> Self {
        Self {
            width: 640.0,
            height: 360.0,
            paddle_width: 10.0,
            paddle_height: 80.0,
            paddle_margin: 20.0,
            paddle_speed: 6.0,
            ball_radius: 5.0,
            serve_speed_x: 5.0,
            serve_speed_y_min: 2.0,
            serve_speed_y_max: 4.0,
            points_to_win: 11,
        }
    }
}

impl PongConfig {
    fn max_paddle_y(&self) -> f32 {
        (self.height - self.paddle_height).max(0.0)
    }

    /// Left edge of a side's paddle
    fn paddle_x(&self, side: Side) -> f32 {
        match side {
            Side::A => self.paddle_margin,
            Side::B => self.width - self.paddle_margin - self.paddle_width,
        }
    }
}

/// Canonical Pong state
pub struct PongSimulation {
    config: PongConfig,
    rng: ChaCha8Rng,
    ball_x: f32,
    ball_y: f32,
    vel_x: f32,
    vel_y: f32,
    /// Top edge of each paddle
    paddle_y: [f32; 2],
    score: [u32; 2],
    paddle_hits: [u32; 2],
}

impl PongSimulation {
    pub fn new(config: PongConfig, seed: u64) -> Self {
        let mut sim = Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            ball_x: 0.0,
            ball_y: 0.0,
            vel_x: 0.0,
            vel_y: 0.0,
            paddle_y: [0.0; 2],
            score: [0; 2],
            paddle_hits: [0; 2],
        };
        sim.reset();
        sim
    }

    pub fn score(&self) -> [u32; 2] {
        self.score
    }

    pub fn paddle_y(&self, side: Side) -> f32 {
        self.paddle_y[side.index()]
    }

    /// Centre the ball and send it towards `toward` with a random vertical component
    fn serve(&mut self, toward: Side) {
        self.ball_x = self.config.width / 2.0;
        self.ball_y = self.config.height / 2.0;

        let direction = match toward {
            Side::A => -1.0,
            Side::B => 1.0,
        };
        self.vel_x = direction * self.config.serve_speed_x;

        let (min, max) = (self.config.serve_speed_y_min, self.config.serve_speed_y_max);
        let magnitude = if max > min {
            self.rng.gen_range(min..=max)
        } else {
            min
        };
        let sign = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        self.vel_y = sign * magnitude;
    }

    fn move_paddles(&mut self, inputs: &SideInputs) {
        let max_y = self.config.max_paddle_y();
        for side in Side::BOTH {
            let input = &inputs[side.index()];
            let mut dy = 0.0;
            if input.up {
                dy -= self.config.paddle_speed;
            }
            if input.down {
                dy += self.config.paddle_speed;
            }
            let y = &mut self.paddle_y[side.index()];
            *y = (*y + dy).clamp(0.0, max_y);
        }
    }

    fn bounce_walls(&mut self) {
        let r = self.config.ball_radius;
        if self.ball_y - r < 0.0 {
            self.ball_y = r;
            self.vel_y = self.vel_y.abs();
        } else if self.ball_y + r > self.config.height {
            self.ball_y = self.config.height - r;
            self.vel_y = -self.vel_y.abs();
        }
    }

    fn overlaps_paddle_vertically(&self, side: Side) -> bool {
        let r = self.config.ball_radius;
        let top = self.paddle_y[side.index()];
        self.ball_y + r >= top && self.ball_y - r <= top + self.config.paddle_height
    }

    /// Force the ball away from a paddle it has reached and snap it to the paddle face
    fn bounce_paddles(&mut self) {
        let r = self.config.ball_radius;

        let left = self.config.paddle_x(Side::A);
        let left_face = left + self.config.paddle_width;
        if self.vel_x < 0.0
            && self.ball_x - r <= left_face
            && self.ball_x + r >= left
            && self.overlaps_paddle_vertically(Side::A)
        {
            self.vel_x = self.vel_x.abs();
            self.ball_x = left_face + r;
            self.paddle_hits[Side::A.index()] += 1;
            return;
        }

        let right_face = self.config.paddle_x(Side::B);
        if self.vel_x > 0.0
            && self.ball_x + r >= right_face
            && self.ball_x - r <= right_face + self.config.paddle_width
            && self.overlaps_paddle_vertically(Side::B)
        {
            self.vel_x = -self.vel_x.abs();
            self.ball_x = right_face - r;
            self.paddle_hits[Side::B.index()] += 1;
        }
    }

    /// At most one goal per step
    fn check_goal(&mut self) {
        let scorer = if self.ball_x < 0.0 {
            Side::B
        } else if self.ball_x > self.config.width {
            Side::A
        } else {
            return;
        };

        self.score[scorer.index()] += 1;
        self.serve(scorer.opponent());
    }
}

impl Simulation for PongSimulation {
    fn kind(&self) -> GameKind {
        GameKind::Pong
    }

    fn reset(&mut self) {
        self.score = [0; 2];
        self.paddle_hits = [0; 2];
        let centred = self.config.max_paddle_y() / 2.0;
        self.paddle_y = [centred; 2];
        let toward = if self.rng.gen_bool(0.5) { Side::A } else { Side::B };
        self.serve(toward);
    }

    fn step(&mut self, inputs: &SideInputs) {
        self.move_paddles(inputs);

        self.ball_x += self.vel_x;
        self.ball_y += self.vel_y;

        self.bounce_walls();
        self.bounce_paddles();
        self.check_goal();
    }

    fn public_snapshot(&self) -> GameSnapshot {
        GameSnapshot::Pong(PongSnapshot {
            width: self.config.width,
            height: self.config.height,
            paddle_width: self.config.paddle_width,
            paddle_height: self.config.paddle_height,
            ball_radius: self.config.ball_radius,
            paddle_a_y: self.paddle_y[0],
            paddle_b_y: self.paddle_y[1],
            ball: BallView {
                x: self.ball_x,
                y: self.ball_y,
            },
            score: ScoreView {
                a: self.score[0],
                b: self.score[1],
            },
        })
    }

    fn defeated(&self) -> [bool; 2] {
        let target = self.config.points_to_win;
        [self.score[1] >= target, self.score[0] >= target]
    }

    fn stats(&self) -> serde_json::Value {
        json!({
            "a": { "points": self.score[0], "paddle_hits": self.paddle_hits[0] },
            "b": { "points": self.score[1], "paddle_hits": self.paddle_hits[1] },
        })
    }
}
