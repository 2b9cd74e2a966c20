// Feed Topics - URI builders for the realtime subscriptions
// Every topic is scoped by operator id and language

use std::fmt;

use crate::core::config::FeedConfig;

/// A realtime subscription the client can open
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedTopic {
    /// Cashout value stream for one placed bet
    Cashout { bet_id: String },
    /// Sports list with event counters; `live` restricts it to live sports
    Disciplines { live: bool },
    /// Single betting offer price stream
    BettingOffer { id: String },
    /// Live matches of one sport with their default markets
    LiveMatches { sport_id: String, matches: u32, markets: u32 },
    /// Grouped markets overview of one match
    MatchDetails { match_id: String },
}

impl FeedTopic {
    pub fn live_matches(sport_id: &str, config: &FeedConfig) -> Self {
        FeedTopic::LiveMatches {
            sport_id: sport_id.to_string(),
            matches: config.live_matches_count,
            markets: config.markets_per_match,
        }
    }

    pub fn uri(&self, operator_id: &str, language: &str) -> String {
        let prefix = format!("/sports/{}/{}", operator_id, language);
        match self {
            FeedTopic::Cashout { bet_id } => format!("{}/cashout/{}", prefix, bet_id),
            FeedTopic::Disciplines { live } => {
                let mode = if *live { "LIVE" } else { "BOTH" };
                format!("{}/disciplines/{}/BOTH", prefix, mode)
            }
            FeedTopic::BettingOffer { id } => format!("{}/bettingOffers/{}", prefix, id),
            FeedTopic::LiveMatches { sport_id, matches, markets } => format!(
                "{}/live-matches-aggregator-main/{}/all-locations/default-event-info/{}/{}",
                prefix, sport_id, matches, markets
            ),
            FeedTopic::MatchDetails { match_id } => {
                format!("{}/match-aggregator-groups-overview/{}/1", prefix, match_id)
            }
        }
    }

    pub fn uri_for(&self, config: &FeedConfig) -> String {
        self.uri(&config.operator_id, &config.language)
    }

    /// Stable identifier used for logging and as a pipeline feed id
    pub fn feed_id(&self) -> String {
        match self {
            FeedTopic::Cashout { bet_id } => format!("cashout:{}", bet_id),
            FeedTopic::Disciplines { live } => format!("disciplines:{}", if *live { "live" } else { "all" }),
            FeedTopic::BettingOffer { id } => format!("offer:{}", id),
            FeedTopic::LiveMatches { sport_id, .. } => format!("live:{}", sport_id),
            FeedTopic::MatchDetails { match_id } => format!("match:{}", match_id),
        }
    }
}

impl fmt::Display for FeedTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.feed_id())
    }
}
