use crossterm::event::{KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use std::time::{Duration, Instant};

pub const DOUBLE_CLICK_WINDOW: Duration = Duration::from_millis(500);

/// Stable name for a clickable area; `item` distinguishes rows of a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId {
    pub name: &'static str,
    pub item: usize,
}

impl RegionId {
    pub const fn new(name: &'static str) -> Self {
        Self { name, item: 0 }
    }

    pub const fn item(name: &'static str, item: usize) -> Self {
        Self { name, item }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitRegion {
    pub id: RegionId,
    pub rect: Rect,
}

/// Regions a pane registered during its last render. Later registrations sit
/// on top of earlier ones.
#[derive(Debug, Clone, Default)]
pub struct HitMap {
    regions: Vec<HitRegion>,
}

impl HitMap {
    pub fn clear(&mut self) {
        self.regions.clear();
    }

    pub fn register(&mut self, id: RegionId, rect: Rect) {
        if rect.width == 0 || rect.height == 0 {
            return;
        }
        self.regions.push(HitRegion { id, rect });
    }

    pub fn resolve(&self, col: u16, row: u16) -> Option<HitRegion> {
        self.regions
            .iter()
            .rev()
            .find(|region| contains(region.rect, col, row))
            .copied()
    }

    pub fn regions(&self) -> &[HitRegion] {
        &self.regions
    }
}

pub fn contains(rect: Rect, col: u16, row: u16) -> bool {
    col >= rect.x
        && col < rect.x.saturating_add(rect.width)
        && row >= rect.y
        && row < rect.y.saturating_add(rect.height)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Press { button: MouseButton, clicks: u8 },
    /// Motion with a button held; routed to the region the press started in.
    Drag,
    Release,
    Scroll { dx: i16, dy: i16 },
    Hover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseAction {
    pub gesture: Gesture,
    pub region: Option<HitRegion>,
    pub col: u16,
    pub row: u16,
    pub modifiers: KeyModifiers,
}

impl MouseAction {
    pub fn is_in(&self, name: &str) -> bool {
        self.region.is_some_and(|region| region.id.name == name)
    }

    pub fn item(&self) -> Option<usize> {
        self.region.map(|region| region.id.item)
    }

    /// Pointer position relative to the region's top-left corner, clamped
    /// into the region for drags that left it.
    pub fn local(&self) -> Option<(u16, u16)> {
        let rect = self.region?.rect;
        let col = self
            .col
            .clamp(rect.x, rect.x + rect.width.saturating_sub(1))
            - rect.x;
        let row = self
            .row
            .clamp(rect.y, rect.y + rect.height.saturating_sub(1))
            - rect.y;
        Some((col, row))
    }
}

#[derive(Debug, Default)]
struct ClickTracker {
    last: Option<(RegionId, Instant, u8)>,
}

impl ClickTracker {
    fn press(&mut self, id: Option<RegionId>, now: Instant) -> u8 {
        let Some(id) = id else {
            self.last = None;
            return 1;
        };
        let clicks = match self.last {
            Some((last, at, count))
                if last == id && now.saturating_duration_since(at) <= DOUBLE_CLICK_WINDOW =>
            {
                count.saturating_add(1)
            }
            _ => 1,
        };
        self.last = Some((id, now, clicks));
        clicks
    }
}

/// Wheel direction as (dx, dy). Shift turns vertical wheel into horizontal;
/// terminals that already report horizontal wheel pass through unchanged.
pub fn scroll_delta(kind: MouseEventKind, modifiers: KeyModifiers) -> Option<(i16, i16)> {
    let shift = modifiers.contains(KeyModifiers::SHIFT);
    match kind {
        MouseEventKind::ScrollUp if shift => Some((-1, 0)),
        MouseEventKind::ScrollDown if shift => Some((1, 0)),
        MouseEventKind::ScrollUp => Some((0, -1)),
        MouseEventKind::ScrollDown => Some((0, 1)),
        MouseEventKind::ScrollLeft => Some((-1, 0)),
        MouseEventKind::ScrollRight => Some((1, 0)),
        _ => None,
    }
}

/// Turns raw terminal mouse events into gestures against the panes' hit maps.
#[derive(Debug, Default)]
pub struct MouseRouter {
    clicks: ClickTracker,
    drag: Option<(usize, Option<HitRegion>)>,
}

impl MouseRouter {
    /// `panes` holds each pane's area and hit map; the result names the pane
    /// index the action belongs to.
    pub fn route(
        &mut self,
        event: MouseEvent,
        panes: &[(Rect, &HitMap)],
        now: Instant,
    ) -> Option<(usize, MouseAction)> {
        let under_pointer = panes
            .iter()
            .position(|(area, _)| contains(*area, event.column, event.row));
        let action = |gesture, region| MouseAction {
            gesture,
            region,
            col: event.column,
            row: event.row,
            modifiers: event.modifiers,
        };

        match event.kind {
            MouseEventKind::Down(button) => {
                let pane = under_pointer?;
                let region = panes[pane].1.resolve(event.column, event.row);
                let clicks = self.clicks.press(region.map(|region| region.id), now);
                self.drag = Some((pane, region));
                Some((pane, action(Gesture::Press { button, clicks }, region)))
            }
            MouseEventKind::Drag(_) => {
                let (pane, region) = self.drag?;
                Some((pane, action(Gesture::Drag, region)))
            }
            MouseEventKind::Up(_) => {
                let (pane, region) = self.drag.take()?;
                Some((pane, action(Gesture::Release, region)))
            }
            MouseEventKind::Moved => {
                let pane = under_pointer?;
                let region = panes[pane].1.resolve(event.column, event.row);
                Some((pane, action(Gesture::Hover, region)))
            }
            kind => {
                let (dx, dy) = scroll_delta(kind, event.modifiers)?;
                let pane = under_pointer?;
                let region = panes[pane].1.resolve(event.column, event.row);
                Some((pane, action(Gesture::Scroll { dx, dy }, region)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: MouseEventKind, column: u16, row: u16) -> MouseEvent {
        MouseEvent {
            kind,
            column,
            row,
            modifiers: KeyModifiers::NONE,
        }
    }

    fn rows_map() -> HitMap {
        let mut map = HitMap::default();
        map.register(RegionId::new("pane"), Rect::new(0, 0, 20, 10));
        for item in 0..3 {
            map.register(
                RegionId::item("row", item),
                Rect::new(1, 1 + item as u16, 18, 1),
            );
        }
        map
    }

    #[test]
    fn topmost_region_wins() {
        let map = rows_map();
        let hit = map.resolve(5, 2).expect("hit");
        assert_eq!(hit.id, RegionId::item("row", 1));
        assert_eq!(map.resolve(5, 8).map(|hit| hit.id), Some(RegionId::new("pane")));
        assert!(map.resolve(30, 2).is_none());
    }

    #[test]
    fn double_click_needs_same_region_within_window() {
        let map = rows_map();
        let panes = [(Rect::new(0, 0, 20, 10), &map)];
        let mut router = MouseRouter::default();
        let start = Instant::now();

        let press = |router: &mut MouseRouter, row, at| {
            let (_, action) = router
                .route(event(MouseEventKind::Down(MouseButton::Left), 4, row), &panes, at)
                .expect("routed");
            router.route(event(MouseEventKind::Up(MouseButton::Left), 4, row), &panes, at);
            match action.gesture {
                Gesture::Press { clicks, .. } => clicks,
                other => panic!("unexpected gesture {other:?}"),
            }
        };

        assert_eq!(press(&mut router, 1, start), 1);
        assert_eq!(press(&mut router, 1, start + Duration::from_millis(200)), 2);
        assert_eq!(press(&mut router, 2, start + Duration::from_millis(300)), 1);
        assert_eq!(press(&mut router, 2, start + Duration::from_millis(1200)), 1);
    }

    #[test]
    fn drag_stays_with_origin_region() {
        let map = rows_map();
        let other = HitMap::default();
        let panes = [
            (Rect::new(0, 0, 20, 10), &map),
            (Rect::new(20, 0, 20, 10), &other),
        ];
        let mut router = MouseRouter::default();
        let now = Instant::now();
        router.route(event(MouseEventKind::Down(MouseButton::Left), 3, 1), &panes, now);

        let (pane, action) = router
            .route(event(MouseEventKind::Drag(MouseButton::Left), 25, 5), &panes, now)
            .expect("drag routed");
        assert_eq!(pane, 0);
        assert_eq!(action.gesture, Gesture::Drag);
        assert_eq!(action.item(), Some(0));
        assert_eq!(action.local(), Some((17, 0)));

        let (pane, action) = router
            .route(event(MouseEventKind::Up(MouseButton::Left), 25, 5), &panes, now)
            .expect("release routed");
        assert_eq!(pane, 0);
        assert_eq!(action.gesture, Gesture::Release);
        assert!(router
            .route(event(MouseEventKind::Drag(MouseButton::Left), 25, 5), &panes, now)
            .is_none());
    }

    #[test]
    fn shift_wheel_scrolls_horizontally() {
        assert_eq!(
            scroll_delta(MouseEventKind::ScrollDown, KeyModifiers::SHIFT),
            Some((1, 0))
        );
        assert_eq!(
            scroll_delta(MouseEventKind::ScrollUp, KeyModifiers::NONE),
            Some((0, -1))
        );
        assert_eq!(
            scroll_delta(MouseEventKind::ScrollLeft, KeyModifiers::NONE),
            Some((-1, 0))
        );
        assert_eq!(scroll_delta(MouseEventKind::Moved, KeyModifiers::NONE), None);
    }
}
