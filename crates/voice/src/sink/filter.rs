//! Filter-Sinks – leiten nur ausgewaehlte Einheiten an ihre Kinder weiter

use std::time::{Duration, Instant};

use super::{Ausgang, AudioSink, VoiceData};
use crate::error::SinkError;
use crate::types::MemberId;

type Praedikat = Box<dyn FnMut(Option<MemberId>, &VoiceData) -> bool + Send>;

// ---------------------------------------------------------------------------
// ConditionalFilter
// ---------------------------------------------------------------------------

/// Leitet weiter, wenn das Praedikat zutrifft
pub struct ConditionalFilter {
    praedikat: Praedikat,
}

impl ConditionalFilter {
    pub fn neu<F>(praedikat: F) -> Self
    where
        F: FnMut(Option<MemberId>, &VoiceData) -> bool + Send + 'static,
    {
        Self {
            praedikat: Box::new(praedikat),
        }
    }
}

impl AudioSink for ConditionalFilter {
    fn write(
        &mut self,
        member: Option<MemberId>,
        data: &VoiceData,
        ausgang: &mut Ausgang<'_>,
    ) -> Result<(), SinkError> {
        if (self.praedikat)(member, data) {
            ausgang.weiterleiten(member, data);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "ConditionalFilter"
    }
}

// ---------------------------------------------------------------------------
// MemberFilter
// ---------------------------------------------------------------------------

/// Leitet nur Einheiten eines Mitglieds weiter; unbekannte Sender fallen raus
pub struct MemberFilter {
    member: MemberId,
}

impl MemberFilter {
    pub fn neu(member: MemberId) -> Self {
        Self { member }
    }
}

impl AudioSink for MemberFilter {
    fn write(
        &mut self,
        member: Option<MemberId>,
        data: &VoiceData,
        ausgang: &mut Ausgang<'_>,
    ) -> Result<(), SinkError> {
        if member == Some(self.member) {
            ausgang.weiterleiten(member, data);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "MemberFilter"
    }
}

// ---------------------------------------------------------------------------
// TimedFilter
// ---------------------------------------------------------------------------

/// Leitet fuer eine feste Dauer weiter
///
/// Die Dauer laeuft ab dem ersten `write` oder, mit [`TimedFilter::ab_jetzt`],
/// ab der Erstellung. Mit [`TimedFilter::danach_beenden`] beendet der Filter
/// nach Ablauf den Empfang.
pub struct TimedFilter {
    dauer: Duration,
    start: Option<Instant>,
    beenden: bool,
}

impl TimedFilter {
    pub fn neu(dauer: Duration) -> Self {
        Self {
            dauer,
            start: None,
            beenden: false,
        }
    }

    pub fn ab_jetzt(dauer: Duration) -> Self {
        Self {
            start: Some(Instant::now()),
            ..Self::neu(dauer)
        }
    }

    pub fn danach_beenden(mut self) -> Self {
        self.beenden = true;
        self
    }

    fn abgelaufen(&self, jetzt: Instant) -> bool {
        self.start
            .is_some_and(|start| jetzt.saturating_duration_since(start) >= self.dauer)
    }
}

impl AudioSink for TimedFilter {
    fn write(
        &mut self,
        member: Option<MemberId>,
        data: &VoiceData,
        ausgang: &mut Ausgang<'_>,
    ) -> Result<(), SinkError> {
        let jetzt = Instant::now();
        self.start.get_or_insert(jetzt);

        if self.abgelaufen(jetzt) {
            return if self.beenden {
                Err(SinkError::Beenden)
            } else {
                Ok(())
            };
        }
        ausgang.weiterleiten(member, data);
        Ok(())
    }

    fn name(&self) -> &str {
        "TimedFilter"
    }
}
